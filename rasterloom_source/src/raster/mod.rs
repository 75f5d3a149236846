mod file;
mod memory;

pub use file::*;
pub use memory::*;

/// Access mode a source was opened or created with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpenMode {
	#[default]
	Read,
	Write,
}

impl OpenMode {
	#[must_use]
	pub fn writable(&self) -> bool {
		matches!(self, OpenMode::Write)
	}
}

impl std::str::FromStr for OpenMode {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> anyhow::Result<OpenMode> {
		match s {
			"r" => Ok(OpenMode::Read),
			"w" => Ok(OpenMode::Write),
			_ => Err(rasterloom_core::ErrorKind::BadArgument(format!("unknown open mode '{s}', expected 'r' or 'w'")).into()),
		}
	}
}
