pub mod callsite;
