#[macro_export]
macro_rules! debug_log {
	($($arg:tt)*) => {{
		#[cfg(debug_assertions)]
		{
			eprintln!($($arg)*);
		}
	}};
}

pub mod cache;
pub mod config;
pub mod extractor;
pub mod index;
pub mod storage;
pub mod watcher;
