//! Segmentation engine: rule compilation, audience counting and the
//! membership synchronizer that keeps cached audience sizes current.

pub mod compiler;
pub mod counter;
pub mod predicates;
pub mod rules;
pub mod store;
pub mod sync;

pub use compiler::{compile, compile_at};
pub use counter::AudienceCounter;
pub use predicates::{Condition, Operand, Predicate};
pub use rules::{Operator, Rule, RuleTerm};
pub use store::{CustomerStore, SegmentStore};
pub use sync::{DeltaOutcome, MembershipChange, MembershipSynchronizer};
