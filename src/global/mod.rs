pub mod layout;
pub mod utils;
