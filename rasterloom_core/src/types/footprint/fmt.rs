use crate::Footprint;
use std::fmt::{self, Debug};

impl Debug for Footprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Footprint(tl=({}, {}), ax=({}, {}), ay=({}, {}), size={}x{})",
			self.origin.0, self.origin.1, self.ax.0, self.ax.1, self.ay.0, self.ay.1, self.rx, self.ry
		)
	}
}
