pub mod analysis;
pub mod dataset;
pub mod fragment;
pub mod turn;
