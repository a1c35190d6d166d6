pub mod archive;
pub mod dates;
pub mod submissions;
pub mod worksheet;
