mod info;
mod repositories;
mod resolve;

pub use info::cmd_info;
pub use repositories::cmd_repositories;
pub use resolve::cmd_resolve;
