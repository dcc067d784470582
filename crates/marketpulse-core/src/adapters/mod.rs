mod eastmoney;
mod synthetic;

pub use eastmoney::{EastmoneyAdapter, EastmoneyConfig};
pub use synthetic::SyntheticAdapter;
