#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gorev_core::ide_detector::{EditorLayout, IdeDetector, Variant};
use gorev_core::platform::CandidatePaths;

/// Local HTTP/1.1 responder serving fixed bodies by request path.
pub struct StubServer {
    pub base: String,
    hits: Arc<AtomicUsize>,
}

impl StubServer {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

type Route = (&'static str, u16, Vec<u8>);

pub fn serve(routes: Vec<Route>) -> StubServer {
    serve_with(move |_| routes)
}

/// Routes are built once the bound address is known.
pub fn serve_with(routes: impl FnOnce(&str) -> Vec<Route>) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let routes = routes(&base);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let path = read_request_path(&stream);
            counter.fetch_add(1, Ordering::SeqCst);

            let (status, body) = routes
                .iter()
                .find(|(route, ..)| *route == path)
                .map(|(_, status, body)| (*status, body.clone()))
                .unwrap_or((404, b"not found".to_vec()));
            let reason = if status == 200 { "OK" } else { "Not Found" };
            let head = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
    });

    StubServer { base, hits }
}

/// Announces `declared_len` body bytes, sends `prefix`, then holds the
/// connection open for `stall` before closing it.
pub fn serve_stalled(declared_len: usize, prefix: Vec<u8>, stall: Duration) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            read_request_path(&stream);
            counter.fetch_add(1, Ordering::SeqCst);
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {declared_len}\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&prefix);
            let _ = stream.flush();
            thread::sleep(stall);
        }
    });

    StubServer { base, hits }
}

/// Latest-release listing for `msenol/gorev` plus its `.vsix` download.
pub fn serve_release(version: &str, vsix: Vec<u8>) -> StubServer {
    let version = version.to_string();
    serve_with(move |base| {
        let listing = serde_json::json!({
            "tag_name": format!("v{version}"),
            "assets": [{
                "name": format!("gorev-vscode-{version}.vsix"),
                "browser_download_url": format!("{base}/download/gorev.vsix"),
            }],
        });
        vec![
            ("/repos/msenol/gorev/releases/latest", 200, listing.to_string().into_bytes()),
            ("/download/gorev.vsix", 200, vsix),
        ]
    })
}

fn read_request_path(stream: &TcpStream) -> String {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
    }
    request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string()
}

/// Temporary editor install: an executable plus an extensions directory.
pub struct FakeEditor {
    _root: tempfile::TempDir,
    pub extensions: PathBuf,
    pub executable: PathBuf,
    pub scratch_root: PathBuf,
}

impl FakeEditor {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let extensions = root.path().join("extensions");
        let scratch_root = root.path().join("scratch");
        fs::create_dir_all(&extensions).unwrap();
        fs::create_dir_all(&scratch_root).unwrap();
        let executable = root.path().join("code");
        fs::write(&executable, b"").unwrap();
        Self {
            _root: root,
            extensions,
            executable,
            scratch_root,
        }
    }

    /// Shell CLI: install creates `<dir_name>`, uninstall removes `<id>-*`,
    /// list prints directory names.
    #[cfg(unix)]
    pub fn with_cli(self, dir_name: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            "#!/bin/sh\n\
             case \"$1\" in\n\
               --install-extension) mkdir -p '{ext}/{dir_name}' ;;\n\
               --uninstall-extension) rm -rf '{ext}'/\"$2\"-* ;;\n\
               --list-extensions) ls '{ext}' ;;\n\
               *) exit 1 ;;\n\
             esac\n",
            ext = self.extensions.display()
        );
        fs::write(&self.executable, script).unwrap();
        fs::set_permissions(&self.executable, fs::Permissions::from_mode(0o755)).unwrap();
        self
    }

    pub fn layout(&self, variant: Variant) -> EditorLayout {
        EditorLayout::new(
            variant,
            CandidatePaths {
                executables: vec![self.executable.clone()],
                config_dirs: Vec::new(),
                extension_dirs: vec![self.extensions.clone()],
            },
        )
    }

    pub fn detector(&self) -> IdeDetector {
        IdeDetector::with_layouts(vec![self.layout(Variant::VsCode)])
    }

    pub fn has_extension_dir(&self, name: &str) -> bool {
        self.extensions.join(name).is_dir()
    }
}

pub fn count_files_with_extension(dir: &Path, extension: &str) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == extension))
        .count()
}
