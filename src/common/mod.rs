pub mod error;
pub mod process;

#[cfg(test)]
pub mod testing;
