pub mod bincode;
pub mod keycode;

pub use keycode::encode_key;
