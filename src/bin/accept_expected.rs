//! Binary to generate/update the .expected files of tests/fixtures
//!
//! Usage:
//!   cargo run --bin accept_expected            # Update all
//!   cargo run --bin accept_expected -- page    # Update only fixtures matching "page"

use siris::{Options, Renderer, Variables, target_path};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

fn main() {
    let filter: Option<String> = std::env::args().nth(1);
    let fixture_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures");
    let extension = Options::default().extension;

    let mut updated = 0;
    let mut skipped = 0;

    for entry in WalkDir::new(&fixture_dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == extension.as_str()))
    {
        let path = entry.path();

        // Apply filter if provided
        if let Some(ref f) = filter {
            if !path.to_string_lossy().contains(f) {
                skipped += 1;
                continue;
            }
        }

        if process_file(path, &extension) {
            updated += 1;
        }
    }

    println!("Updated {} files, skipped {}", updated, skipped);
}

fn process_file(path: &Path, extension: &str) -> bool {
    let target = match target_path(path, extension) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("Skipping {}: {}", path.display(), e);
            return false;
        }
    };

    let vars_path = format!("{}.vars.json", target.display());
    let variables: Variables = match fs::read_to_string(&vars_path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(vars) => vars,
            Err(e) => {
                eprintln!("Bad variables in {}: {}", vars_path, e);
                return false;
            }
        },
        Err(_) => Variables::new(),
    };

    match Renderer::default().render_to_string(path, &variables) {
        Ok(output) => {
            let expected = format!("{}.expected", target.display());
            if let Err(e) = fs::write(&expected, output) {
                eprintln!("Failed to write {}: {}", expected, e);
                return false;
            }
            println!("  ✓ {}", expected);
            true
        }
        Err(e) => {
            eprint!("{}", e.render());
            false
        }
    }
}
