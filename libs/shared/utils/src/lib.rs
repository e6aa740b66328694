pub mod clock;
pub mod extractor;
pub mod jwt;
pub mod locks;
pub mod test_utils;
