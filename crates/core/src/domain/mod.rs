pub mod append;
pub mod claim;
pub mod key;
pub mod scope;
