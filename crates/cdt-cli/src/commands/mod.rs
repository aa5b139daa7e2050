pub mod featurize;
pub mod inspect;
pub mod label;
pub mod preprocess;
pub mod util;
