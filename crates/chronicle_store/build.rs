use std::env;
use std::fs;
use std::path::PathBuf;

const MANIFEST: &str = "schema_manifest.json";
const REQUIRED_TABLES: [&str; 3] = ["metadata_schema_version", "metadata_aspect", "metadata_index"];

fn main() {
    println!("cargo:rerun-if-changed={MANIFEST}");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let payload = fs::read_to_string(MANIFEST).expect("read schema_manifest.json");
    for table in REQUIRED_TABLES {
        assert!(
            payload.contains(&format!("\"{table}\"")),
            "schema manifest does not describe table {table}"
        );
    }
    fs::write(out_dir.join(MANIFEST), payload).expect("write schema manifest");
}
