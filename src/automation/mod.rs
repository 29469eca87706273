pub mod backend;
pub mod keys;
pub mod locate;
pub mod tools;
