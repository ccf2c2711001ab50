//! Conversion of VASP INCAR parameter files from and to JSON documents
pub mod incar;

pub use incar::{json_to_txt_file, txt_to_json_file, Incar, IncarError, Section};
