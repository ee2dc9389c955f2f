//! Build script for ccsync
//!
//! Checks that the FFmpeg development libraries can be found before
//! ffmpeg-sys-next tries to link them, prints install hints when they
//! cannot, and on Windows copies the FFmpeg DLLs next to the binaries.

use std::env;
use std::path::{Path, PathBuf};

/// Libraries the decode path links against
const FFMPEG_LIBRARIES: [&str; 5] = ["avcodec", "avformat", "avutil", "swscale", "swresample"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");

    // ffmpeg-sys-next builds its own copy
    if env::var_os("CARGO_FEATURE_BUNDLED_FFMPEG").is_some() {
        return;
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    if let Err(e) = configure_ffmpeg(&target_os) {
        println!("cargo:warning=FFmpeg configuration failed: {}", e);
        print_install_hints(&target_os);
    }
}

/// Locate FFmpeg through pkg-config, FFMPEG_DIR or the platform defaults
fn configure_ffmpeg(target_os: &str) -> Result<(), Box<dyn std::error::Error>> {
    // Link flags come from ffmpeg-sys-next; only check presence here
    let found_all = FFMPEG_LIBRARIES.iter().all(|lib| {
        pkg_config::Config::new()
            .cargo_metadata(false)
            .probe(&format!("lib{}", lib))
            .is_ok()
    });
    if found_all {
        return Ok(());
    }

    if let Some(ffmpeg_dir) = env::var_os("FFMPEG_DIR") {
        let ffmpeg_path = PathBuf::from(ffmpeg_dir);
        if ffmpeg_path.exists() {
            return configure_ffmpeg_from_path(&ffmpeg_path, target_os);
        }
        return Err(format!("FFMPEG_DIR {} does not exist", ffmpeg_path.display()).into());
    }

    for path in default_ffmpeg_paths(target_os) {
        if path.join("include").join("libavcodec").exists() {
            return configure_ffmpeg_from_path(&path, target_os);
        }
    }

    Err("FFmpeg not found".into())
}

fn configure_ffmpeg_from_path(path: &Path, target_os: &str) -> Result<(), Box<dyn std::error::Error>> {
    let include_path = path.join("include");
    let lib_path = path.join("lib");

    if !include_path.exists() || !lib_path.exists() {
        return Err(format!("{} has no include/ and lib/ directories", path.display()).into());
    }

    println!("cargo:rustc-link-search=native={}", lib_path.display());

    if target_os == "windows" {
        copy_ffmpeg_dlls(path)?;
    }

    Ok(())
}

fn default_ffmpeg_paths(target_os: &str) -> Vec<PathBuf> {
    match target_os {
        "windows" => {
            let mut paths = vec![
                PathBuf::from("C:\\ffmpeg"),
                PathBuf::from("C:\\Program Files\\ffmpeg"),
                PathBuf::from("C:\\tools\\ffmpeg"),
            ];
            if let Ok(cwd) = env::current_dir() {
                paths.push(cwd.join("ffmpeg"));
            }
            paths
        }
        "macos" => vec![
            PathBuf::from("/usr/local"),
            PathBuf::from("/opt/homebrew"),
            PathBuf::from("/opt/local"), // MacPorts
        ],
        "linux" => vec![
            PathBuf::from("/usr"),
            PathBuf::from("/usr/local"),
            PathBuf::from("/opt/ffmpeg"),
        ],
        _ => vec![],
    }
}

fn print_install_hints(target_os: &str) {
    println!("cargo:warning=Install the FFmpeg development libraries, or build with --features bundled-ffmpeg:");

    match target_os {
        "windows" => {
            println!("cargo:warning=  1. Download a shared build from https://www.gyan.dev/ffmpeg/builds/");
            println!("cargo:warning=  2. Extract it to C:\\ffmpeg");
            println!("cargo:warning=  3. Set FFMPEG_DIR=C:\\ffmpeg");
        }
        "macos" => {
            println!("cargo:warning=  brew install ffmpeg pkg-config");
        }
        "linux" => {
            println!(
                "cargo:warning=  Ubuntu/Debian: sudo apt install libavcodec-dev libavformat-dev libavutil-dev libswscale-dev libswresample-dev"
            );
            println!("cargo:warning=  Fedora: sudo dnf install ffmpeg-devel");
            println!("cargo:warning=  Arch: sudo pacman -S ffmpeg");
        }
        _ => {}
    }
}

/// Copy the FFmpeg DLLs next to the built executables
fn copy_ffmpeg_dlls(ffmpeg_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bin_path = ffmpeg_path.join("bin");
    if !bin_path.exists() {
        return Ok(());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .ok_or("unexpected OUT_DIR layout")?;

    for lib in FFMPEG_LIBRARIES {
        let pattern = bin_path.join(format!("{}-*.dll", lib));

        for dll_path in glob::glob(&pattern.to_string_lossy())?.flatten() {
            let Some(dll_name) = dll_path.file_name() else {
                continue;
            };
            let dest = target_dir.join(dll_name);

            if !dest.exists() {
                std::fs::copy(&dll_path, &dest)?;
            }
        }
    }

    Ok(())
}
