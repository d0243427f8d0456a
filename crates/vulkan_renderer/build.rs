// build.rs
// Compiles the GLSL sources under resources/shaders into SPIR-V next to the build output

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 2] = ["vert", "frag"];

fn main() {
    println!("cargo:rerun-if-changed=../../resources/shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: SKIP_SHADERS set, not compiling shaders");
        return;
    }

    let Some(glslc) = find_glslc() else {
        eprintln!("warning: glslc not found (set VULKAN_SDK), shader compilation skipped");
        return;
    };

    let shader_dir = PathBuf::from("../../resources/shaders");
    let target_dir = PathBuf::from("../../target/shaders");

    let entries = match fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory at {:?}", shader_dir);
            return;
        }
    };

    if let Err(e) = fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create {:?}: {}", target_dir, e);
        return;
    }

    let mut compiled = 0;
    for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
        let is_shader = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_EXTENSIONS.contains(&ext));
        if !is_shader {
            continue;
        }

        // default.vert -> default.vert.spv so stages sharing a stem don't collide
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let out_file = target_dir.join(format!("{file_name}.spv"));

        if is_up_to_date(&path, &out_file) {
            continue;
        }

        let status = Command::new(&glslc).arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => compiled += 1,
            Ok(s) => panic!("glslc failed for {:?} (exit code {:?})", path, s.code()),
            Err(e) => panic!("Failed to run glslc for {:?}: {}", path, e),
        }
    }

    eprintln!("info: Compiled {} shader(s)", compiled);
}

fn find_glslc() -> Option<PathBuf> {
    let sdk = env::var("VULKAN_SDK").ok()?;
    let glslc = if cfg!(target_os = "windows") {
        Path::new(&sdk).join("Bin").join("glslc.exe")
    } else {
        Path::new(&sdk).join("bin").join("glslc")
    };
    glslc.exists().then_some(glslc)
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(dst)) => dst >= src,
        _ => false,
    }
}
