// Mappers module - Protocol converters

pub mod openai;
pub mod vertical;
