/// Runtime platform context injected into the system prompt so the agent
/// issues platform-appropriate commands.
pub struct PlatformInfo {
    pub os: &'static str,
    pub shell: &'static str,
    pub path_sep: &'static str,
}

pub fn current() -> PlatformInfo {
    if cfg!(target_os = "windows") {
        PlatformInfo {
            os: "windows",
            shell: "cmd",
            path_sep: "\\",
        }
    } else if cfg!(target_os = "macos") {
        PlatformInfo {
            os: "darwin",
            shell: "sh",
            path_sep: "/",
        }
    } else {
        PlatformInfo {
            os: "linux",
            shell: "sh",
            path_sep: "/",
        }
    }
}

/// Short system-prompt section describing the exec runtime.
pub fn agent_context() -> &'static str {
    if cfg!(target_os = "windows") {
        "## Runtime (exec tool)\n\
         - OS: Windows\n\
         - Shell: cmd.exe (/c)\n\
         - Path separator: backslash (\\)\n\
         - Create dir: mkdir E:\\path\\to\\dir (parent must exist; use multiple mkdir if needed)\n\
         - Chain commands: use && (cmd supports it)\n\
         - List dir: dir\n\
         - Find files: dir /s /b .git\n\
         - Use exec tool for file ops (mkdir, git init, etc.); invoke_cli_agent does NOT run commands on this machine"
    } else if cfg!(target_os = "macos") {
        "## Runtime (exec tool)\n\
         - OS: macOS\n\
         - Shell: sh\n\
         - Path separator: /\n\
         - Create dir: mkdir -p /path/to/dir\n\
         - Chain commands: && or ;\n\
         - List dir: ls\n\
         - Find files: find . -name .git -type d"
    } else {
        "## Runtime (exec tool)\n\
         - OS: Linux\n\
         - Shell: sh\n\
         - Path separator: /\n\
         - Create dir: mkdir -p /path/to/dir\n\
         - Chain commands: && or ;\n\
         - List dir: ls\n\
         - Find files: find . -name .git -type d"
    }
}
