mod change_reader;

pub use change_reader::ChangeReader;
