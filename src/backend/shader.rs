// Shader loading and compilation
//
// Vulkan consumes SPIR-V words. GLSL sources are turned into SPIR-V by an
// external compiler (glslc) run as a child process; results are cached on
// disk next to each other as `<stage>_<name>.spv`.

use ash::vk;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ShaderConfig;
use crate::error::{GfxError, Result};

const SPIRV_MAGIC: u32 = 0x0723_0203;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Detect the stage from the source file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "comp" => Some(Self::Compute),
            _ => None,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }

    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Compiled, word-aligned SPIR-V for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    pub stage: ShaderStage,
    pub name: String,
    pub words: Vec<u32>,
}

impl ShaderBytecode {
    pub fn from_bytes(stage: ShaderStage, name: impl Into<String>, bytes: &[u8]) -> std::io::Result<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "missing SPIR-V magic number",
            ));
        }
        Ok(Self {
            stage,
            name: name.into(),
            words,
        })
    }

    pub fn load(stage: ShaderStage, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| compile_error(path, format!("failed to read bytecode: {}", e)))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(stage, name, &bytes).map_err(|e| compile_error(path, format!("invalid SPIR-V: {}", e)))
    }
}

/// Create a shader module from compiled bytecode
pub fn create_shader_module(device: &ash::Device, shader: &ShaderBytecode) -> ash::prelude::VkResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(&shader.words);
    unsafe { device.create_shader_module(&create_info, None) }
}

/// Runs the external GLSL compiler with a bounded wait
#[derive(Debug, Clone)]
pub struct ShaderCompiler {
    compiler: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
    force_recompile: bool,
}

impl ShaderCompiler {
    pub fn new(compiler: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            compiler: compiler.into(),
            output_dir: output_dir.into(),
            timeout,
            force_recompile: false,
        }
    }

    pub fn from_config(config: &ShaderConfig) -> Self {
        Self::new(config.compiler.clone(), config.output_dir.clone(), config.timeout())
            .force_recompile(config.force_recompile)
    }

    pub fn force_recompile(mut self, force: bool) -> Self {
        self.force_recompile = force;
        self
    }

    /// Where the compiled artifact for `source` lives
    pub fn output_path(&self, source: &Path) -> Result<PathBuf> {
        let stage = detect_stage(source)?;
        let stem = source
            .file_stem()
            .ok_or_else(|| compile_error(source, "source has no file name"))?;
        Ok(self
            .output_dir
            .join(format!("{}_{}.spv", stage.short_name(), stem.to_string_lossy())))
    }

    /// Compile every source, stopping at the first failure
    pub fn compile_all(&self, sources: &[PathBuf]) -> Result<Vec<ShaderBytecode>> {
        sources.iter().map(|source| self.compile(source)).collect()
    }

    pub fn compile(&self, source: &Path) -> Result<ShaderBytecode> {
        let stage = detect_stage(source)?;
        let output = self.output_path(source)?;

        if !source.exists() {
            return Err(compile_error(source, "source file not found"));
        }

        if !self.force_recompile && is_up_to_date(source, &output) {
            log::debug!("Using cached {:?}", output);
        } else {
            std::fs::create_dir_all(&self.output_dir)
                .map_err(|e| compile_error(source, format!("cannot create {:?}: {}", self.output_dir, e)))?;
            log::info!("Compiling {:?}", source);
            self.run_compiler(source, &output)?;
            log::info!("Compiled {:?} -> {:?}", source, output);
        }

        ShaderBytecode::load(stage, &output)
    }

    /// `output` only ever holds the result of a successful run; the compiler
    /// writes next to it and the file is moved into place afterwards.
    fn run_compiler(&self, source: &Path, output: &Path) -> Result<()> {
        let partial = partial_path(output);
        let result = self.invoke(source, &partial).and_then(|()| {
            std::fs::rename(&partial, output)
                .map_err(|e| compile_error(source, format!("cannot move output into place: {}", e)))
        });

        if result.is_err() {
            let _ = std::fs::remove_file(&partial);
        }
        result
    }

    fn invoke(&self, source: &Path, output: &Path) -> Result<()> {
        let mut child = Command::new(&self.compiler)
            .arg(source)
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| compile_error(source, format!("failed to start {:?}: {}", self.compiler, e)))?;

        // Drain stderr off-thread so a chatty compiler cannot fill the pipe
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let status = match wait_with_timeout(&mut child, self.timeout) {
            Ok(status) => status,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(compile_error(source, format!("failed waiting for compiler: {}", e)));
            }
        };

        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            log::warn!("Compiler timed out after {:?} on {:?}", self.timeout, source);
            return Err(compile_error(
                source,
                format!("compiler did not finish within {:?}", self.timeout),
            ));
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(compile_error(
                source,
                format!("compiler exited with {}: {}", status, stderr.trim()),
            ));
        }
        if !output.exists() {
            return Err(compile_error(source, "compiler reported success but wrote no output"));
        }
        Ok(())
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn detect_stage(source: &Path) -> Result<ShaderStage> {
    ShaderStage::from_path(source)
        .ok_or_else(|| compile_error(source, "unknown shader stage (expected .vert, .frag or .comp)"))
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|m| m.modified());
    match (modified(source), modified(output)) {
        (Ok(source_time), Ok(output_time)) => output_time >= source_time,
        _ => false,
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn compile_error(path: &Path, reason: impl Into<String>) -> GfxError {
    GfxError::ShaderCompilationFailed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(test)]
#[path = "shader_tests.rs"]
mod tests;
