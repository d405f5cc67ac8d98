pub mod encoding;
pub mod envelope;
pub mod keys;
