// TPCx-BB query definitions

pub mod q23;
pub mod q26;

pub use q23::Q23;
pub use q26::Q26;
