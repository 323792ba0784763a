//! Session fingerprinting: a stable hash over the
//! identity of an upload target, used by the coordinator to recover a
//! client's prior session on re-initialize instead of duplicating it.

use blake2::{Blake2b512, Digest};

pub const FINGERPRINT_ALGO: &str = "blake2b-512";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub String);

pub struct FingerprintInput<'a> {
	pub user_id: &'a str,
	pub storage_config_id: &'a str,
	pub mount_id: &'a str,
	pub fs_path: &'a str,
	pub file_name: &'a str,
	pub file_size: u64,
}

pub fn compute(input: &FingerprintInput<'_>) -> Fingerprint {
	let mut hasher = Blake2b512::new();
	hasher.update(input.user_id.as_bytes());
	hasher.update(b"\0");
	hasher.update(input.storage_config_id.as_bytes());
	hasher.update(b"\0");
	hasher.update(input.mount_id.as_bytes());
	hasher.update(b"\0");
	hasher.update(input.fs_path.as_bytes());
	hasher.update(b"\0");
	hasher.update(input.file_name.as_bytes());
	hasher.update(b"\0");
	hasher.update(input.file_size.to_be_bytes());
	Fingerprint(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_input_same_fingerprint() {
		let a = FingerprintInput {
			user_id: "u1",
			storage_config_id: "s1",
			mount_id: "m1",
			fs_path: "/a/b.txt",
			file_name: "b.txt",
			file_size: 42,
		};
		assert_eq!(compute(&a), compute(&a));
	}

	#[test]
	fn different_path_different_fingerprint() {
		let mk = |p: &'static str| FingerprintInput {
			user_id: "u1",
			storage_config_id: "s1",
			mount_id: "m1",
			fs_path: p,
			file_name: "b.txt",
			file_size: 42,
		};
		assert_ne!(compute(&mk("/a/b.txt")), compute(&mk("/a/c.txt")));
	}
}
