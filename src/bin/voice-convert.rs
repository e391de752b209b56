use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, process};
use tracing_subscriber::EnvFilter;
use voice_convert_core::{
    model_information, set_convert_progress_callback, ConversionRequest, ConvertProgress,
    ExportFormat, F0Method, InferenceBackend, PipelineConfig, VoiceConverter,
};

#[derive(Parser)]
#[command(name = "voice-convert")]
#[command(about = "Retrieval-based voice conversion", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one file
    Convert {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        opts: ConvertArgs,
    },

    /// Convert every audio file of a directory
    Batch {
        #[arg(long)]
        input_dir: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,

        /// Marker file; delete it to stop the batch before the next file
        #[arg(long)]
        pid_file: PathBuf,

        #[command(flatten)]
        opts: ConvertArgs,
    },

    /// Print checkpoint metadata
    Info {
        #[arg(short, long)]
        model: PathBuf,
    },
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(short, long)]
    model: Option<PathBuf>,

    #[arg(long)]
    index: Option<String>,

    /// Embedder id, looked up in --embedder-dir
    #[arg(long)]
    embedder: Option<String>,

    #[arg(long, env = "VC_EMBEDDER_DIR", default_value = "embedders")]
    embedder_dir: PathBuf,

    /// Transposition in semitones
    #[arg(long, allow_hyphen_values = true)]
    pitch: Option<i32>,

    #[arg(long)]
    f0_method: Option<F0Method>,

    #[arg(long)]
    index_rate: Option<f32>,

    #[arg(long)]
    protect: Option<f32>,

    #[arg(long)]
    hop_length: Option<usize>,

    #[arg(long)]
    split: bool,

    #[arg(long)]
    autotune: bool,

    #[arg(long)]
    clean: bool,

    /// Shift formants by --formant-timbre before conversion
    #[arg(long)]
    formant_shift: bool,

    #[arg(long)]
    formant_quefrency: Option<f32>,

    #[arg(long)]
    formant_timbre: Option<f32>,

    #[arg(long)]
    export_format: Option<ExportFormat>,

    /// Full request as JSON; flags given on the command line override it
    #[arg(long)]
    request: Option<PathBuf>,

    #[arg(short, long)]
    quiet: bool,
}

impl ConvertArgs {
    fn to_request(&self) -> voice_convert_core::Result<ConversionRequest> {
        let mut req = match &self.request {
            Some(path) => ConversionRequest::from_json_file(path)?,
            None => ConversionRequest::default(),
        };
        if let Some(m) = &self.model {
            req.model_path = m.clone();
        }
        if let Some(i) = &self.index {
            req.index_path = i.clone();
        }
        if let Some(e) = &self.embedder {
            req.embedder_model = e.clone();
        }
        if let Some(p) = self.pitch {
            req.pitch = p;
        }
        if let Some(m) = &self.f0_method {
            req.f0_method = m.clone();
        }
        if let Some(r) = self.index_rate {
            req.index_rate = r;
        }
        if let Some(p) = self.protect {
            req.protect = p;
        }
        if let Some(h) = self.hop_length {
            req.hop_length = h;
        }
        if let Some(f) = self.export_format {
            req.export_format = f;
        }
        if let Some(q) = self.formant_quefrency {
            req.formant_quefrency = q;
        }
        if let Some(t) = self.formant_timbre {
            req.formant_timbre = t;
        }
        req.formant_shifting |= self.formant_shift;
        req.split_audio |= self.split;
        req.f0_autotune |= self.autotune;
        req.clean_audio |= self.clean;
        req.validate()?;
        Ok(req)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            opts,
        } => handle_convert(input, output, opts),
        Commands::Batch {
            input_dir,
            output_dir,
            pid_file,
            opts,
        } => handle_batch(input_dir, output_dir, pid_file, opts),
        Commands::Info { model } => handle_info(model),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(feature = "onnx")]
fn backend(embedder_dir: PathBuf) -> Result<Box<dyn InferenceBackend>, Box<dyn std::error::Error>> {
    Ok(Box::new(voice_convert_core::OnnxBackend::new(embedder_dir)))
}

#[cfg(not(feature = "onnx"))]
fn backend(_embedder_dir: PathBuf) -> Result<Box<dyn InferenceBackend>, Box<dyn std::error::Error>> {
    Err("no inference backend compiled in; rebuild with --features onnx".into())
}

fn converter(opts: &ConvertArgs) -> Result<VoiceConverter, Box<dyn std::error::Error>> {
    let backend = backend(opts.embedder_dir.clone())?;
    Ok(VoiceConverter::new(backend, PipelineConfig::from_env())?)
}

fn handle_convert(
    input: PathBuf,
    output: PathBuf,
    opts: ConvertArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }
    let req = opts.to_request()?;
    if !opts.quiet {
        setup_progress_callback();
        eprintln!("Input:  {}", input.display());
        eprintln!("Model:  {}", req.model_path.display());
        eprintln!("Method: {}", req.f0_method);
    }

    let mut vc = converter(&opts)?;
    let result = vc.convert_audio(&input, &output, &req)?;

    if opts.quiet {
        println!("{}", result.output_path.display());
    } else {
        eprintln!(
            "Done: {} ({} Hz, {} segment(s))",
            result.output_path.display(),
            result.sample_rate,
            result.segments
        );
    }
    Ok(())
}

fn handle_batch(
    input_dir: PathBuf,
    output_dir: PathBuf,
    pid_file: PathBuf,
    opts: ConvertArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let req = opts.to_request()?;
    if !opts.quiet {
        setup_progress_callback();
    }
    let mut vc = converter(&opts)?;
    let report = vc.convert_batch(&input_dir, &output_dir, &pid_file, &req)?;

    for path in &report.converted {
        println!("{}", path.display());
    }
    if !opts.quiet {
        eprintln!(
            "Batch finished: {} converted, {} skipped",
            report.converted.len(),
            report.skipped.len()
        );
    }
    Ok(())
}

fn handle_info(model: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", model_information(&model)?);
    Ok(())
}

fn setup_progress_callback() {
    set_convert_progress_callback(|progress| match progress {
        ConvertProgress::Stage(stage) => {
            let stage_name = match stage {
                "load" => "Reading audio",
                "split" => "Splitting on silence",
                "embedder" => "Loading embedder",
                "pitch" => "Tracking pitch",
                "convert" => "Converting",
                "merge" => "Merging segments",
                "effects" => "Applying effects",
                "clean" => "Reducing noise",
                "export" => "Exporting",
                _ => stage,
            };
            eprintln!("{}", stage_name);
        }
        ConvertProgress::Chunks {
            done,
            total,
            percent,
        } => {
            eprint!("\rProcessing: {}/{} chunks ({:.0}%)", done, total, percent);
            if done >= total {
                eprintln!();
            }
        }
        ConvertProgress::Segments { done, total } => {
            eprintln!("Segment {}/{} converted", done, total);
        }
        ConvertProgress::Batch { done, total } => {
            eprintln!("File {}/{} done", done, total);
        }
        ConvertProgress::Finished => {}
    });
}
