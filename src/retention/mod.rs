mod logic;
pub(crate) mod policy;

pub use logic::decide_remove;
pub use policy::TieredPolicy;
