use std::env;
use std::fs;
use std::path::Path;

use itertools::Itertools;

/// Every kind of error this crate can produce, grouped loosely by the
/// subsystem that raises it. Kept here instead of hand-writing the enum so
/// adding a new kind is a one-line change.
const KINDS: &[&str] = &[
    "Error",
    "Io",
    "Hub",
    "HubEdgeAlreadyExists",
    "HubSelfLoopEdge",
    "HubUnknownAdvertisedPort",
    "HubTransportClosed",
    "HubBindFailed",
    "Communication",
    "CommunicationFrame",
    "CryptoHash",
];

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let dest = Path::new(&out_dir).join("error_kind.rs");

    let variants = KINDS.iter().join(",\n    ");
    let contents = format!(
        "/// The kind of error produced by a fallible operation in this crate.\n\
         #[derive(Debug, Copy, Clone, Eq, PartialEq)]\n\
         pub enum ErrorKind {{\n    {variants},\n}}\n"
    );

    fs::write(&dest, contents).unwrap();
    println!("cargo:rerun-if-changed=build.rs");
}
