pub mod backend;
pub mod conditional;
pub mod error;
pub mod key_derivation;
pub mod key_validator;
pub mod metadata_codec;
pub mod object_store;
pub mod value_codec;
