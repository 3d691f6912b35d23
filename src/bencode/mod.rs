mod decoder;
mod encoder;
mod value;

pub use decoder::{decode, dict_value_span};
pub use encoder::encode;
pub use value::BencodeValue;
