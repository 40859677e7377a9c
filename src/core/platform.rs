use std::path::PathBuf;

/// Relative location of the simulator jar inside a built Forge checkout
pub const FORGE_JAR_GLOB: &str =
    "forge-gui-desktop/target/forge-gui-desktop-*-jar-with-dependencies.jar";

/// Directories that commonly hold a Forge checkout, most specific first
pub fn get_default_forge_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    // Running from inside the checkout, or from one of its service folders
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        if let Some(parent) = cwd.parent() {
            dirs.push(parent.to_path_buf());
        }
    }

    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join("forge"));
        dirs.push(home.join("src/forge"));
    }

    if cfg!(target_os = "windows") {
        dirs.push(PathBuf::from(r"C:\Forge"));
    } else {
        dirs.push(PathBuf::from("/opt/forge"));
        dirs.push(PathBuf::from("/usr/local/share/forge"));
    }

    dirs
}

pub fn get_os_info() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
