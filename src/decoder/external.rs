//! Converters that live outside the process (exiftool, dcraw, heif-convert).
//!
//! A tool is plain data: a program, an argument template and where its output
//! lands. Scratch files are `NamedTempFile`s, so they are removed when the
//! attempt returns, whichever way it returns.

use super::{DecodeError, DecodeStrategy, non_empty, to_gray};
use image::GrayImage;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

const INPUT: &str = "{input}";
const OUTPUT: &str = "{output}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    /// Image bytes are written to stdout.
    Stdout,
    /// The tool writes to a path given through `{output}`.
    ScratchFile { suffix: &'static str },
}

#[derive(Debug, Clone)]
pub struct ExternalTool {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub output: ToolOutput,
    /// Smaller outputs are treated as failures (stub thumbnails).
    pub min_bytes: usize,
}

impl ExternalTool {
    pub fn new(label: impl Into<String>, program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output: ToolOutput::Stdout,
            min_bytes: 1,
        }
    }

    pub fn with_scratch_file(mut self, suffix: &'static str) -> Self {
        self.output = ToolOutput::ScratchFile { suffix };
        self
    }

    pub fn with_min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes.max(1);
        self
    }

    /// Runs the tool and returns the produced image bytes.
    pub fn run(&self, input: &Path) -> Result<Vec<u8>, DecodeError> {
        let scratch = match self.output {
            ToolOutput::Stdout => None,
            ToolOutput::ScratchFile { suffix } => Some(
                tempfile::Builder::new()
                    .prefix("imagefinder-")
                    .suffix(suffix)
                    .tempfile()?,
            ),
        };

        let output_arg = scratch
            .as_ref()
            .map(|f| f.path().to_string_lossy().into_owned())
            .unwrap_or_default();
        let input_arg = input.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(INPUT, &input_arg).replace(OUTPUT, &output_arg))
            .collect();

        log::debug!("Running {} {}", self.program, args.join(" "));
        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DecodeError::ToolMissing {
                    program: self.program.clone(),
                },
                _ => DecodeError::Io(e),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(DecodeError::ToolFailed {
                program: self.program.clone(),
                message: format!("{} ({})", stderr.trim(), result.status),
            });
        }

        let bytes = match &scratch {
            None => result.stdout,
            Some(file) => std::fs::read(file.path())?,
        };

        if bytes.len() < self.min_bytes {
            return Err(DecodeError::ToolFailed {
                program: self.program.clone(),
                message: format!(
                    "output too small ({} bytes, need at least {})",
                    bytes.len(),
                    self.min_bytes
                ),
            });
        }

        Ok(bytes)
    }
}

impl DecodeStrategy for ExternalTool {
    fn label(&self) -> &str {
        &self.label
    }

    fn attempt(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        let bytes = self.run(path)?;
        let img = image::load_from_memory(&bytes)?;
        non_empty(path, to_gray(&img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_missing_program() {
        let tool = ExternalTool::new("missing", "imagefinder-no-such-tool", &["{input}"]);
        assert!(matches!(
            tool.run(Path::new("x.nef")),
            Err(DecodeError::ToolMissing { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_capture() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("source.png");
        create_test_image(&path, 16, 9);

        let tool = ExternalTool::new("cat", "cat", &["{input}"]);
        let gray = tool.attempt(&path).unwrap();
        assert_eq!(gray.dimensions(), (16, 9));
    }

    #[cfg(unix)]
    #[test]
    fn test_scratch_file_output_is_cleaned_up() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("source.png");
        let record = temp_dir.path().join("scratch-path.txt");
        create_test_image(&path, 10, 10);

        let script = format!("cp \"$0\" \"$1\" && printf %s \"$1\" > '{}'", record.display());
        let tool = ExternalTool::new("copy", "sh", &["-c", &script, "{input}", "{output}"])
            .with_scratch_file(".png");

        let gray = tool.attempt(&path).unwrap();
        assert_eq!(gray.dimensions(), (10, 10));

        let scratch = std::fs::read_to_string(&record).unwrap();
        assert!(scratch.ends_with(".png"));
        assert!(!Path::new(&scratch).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failures_and_stub_output() {
        let failing = ExternalTool::new("false", "sh", &["-c", "echo boom >&2; exit 3"]);
        match failing.run(Path::new("x")) {
            Err(DecodeError::ToolFailed { message, .. }) => assert!(message.contains("boom")),
            other => panic!("unexpected: {:?}", other.map(|b| b.len())),
        }

        let stub = ExternalTool::new("tiny", "sh", &["-c", "printf abc"]).with_min_bytes(10_000);
        assert!(matches!(
            stub.run(Path::new("x")),
            Err(DecodeError::ToolFailed { .. })
        ));
    }
}
