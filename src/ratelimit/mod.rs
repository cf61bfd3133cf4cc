//! Admission decisions and the data they are made from.

mod key;
mod limiter;
mod policy;
mod verdict;

pub use key::{IdentityKey, IdentityKind};
pub use limiter::{AdmissionEngine, WINDOW};
pub use policy::{parse_token_list, LimitPolicy, PolicySet};
pub use verdict::{Verdict, LIMIT_EXCEEDED_MESSAGE};
