// lib.rs
pub mod cooler;
pub mod eigdecomp;
pub mod error;
pub mod genome;
pub mod output;
pub mod reader;
pub mod track;
pub mod view;
