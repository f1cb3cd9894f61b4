use crate::config::HostConfig;
use crate::error::Result;

pub fn execute(config: &HostConfig) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(config)?);
	Ok(())
}
