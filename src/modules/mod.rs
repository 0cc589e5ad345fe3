pub mod media;
pub mod publish;
