use kiln_lib::platform::paths::{artifact_cache_dir, cache_dir, local_m2_repository_dir};

use crate::output::print_stat;

pub fn cmd_info() {
  println!("kiln {}", env!("CARGO_PKG_VERSION"));
  println!();
  println!("Directories:");
  print_stat("Cache", &cache_dir().display().to_string());
  print_stat("Downloads", &artifact_cache_dir().display().to_string());
  print_stat("Local Maven repository", &local_m2_repository_dir().display().to_string());
}
