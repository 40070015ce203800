pub mod decode;
pub mod loader;
pub mod model;

pub use decode::{decode_group, decode_register, decode_register_bytes, DecodedField, DecodedRegister};
pub use loader::load_register_map;
pub use model::{BitField, Register, RegisterGroup, RegisterMap};
