use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "luma", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an image through a JSON filter chain.
    Apply(ApplyArgs),
    /// Write the identity 512x512 lookup table image.
    IdentityLut(IdentityLutArgs),
}

#[derive(Parser, Debug)]
struct ApplyArgs {
    /// Input image.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Filter chain JSON. Overlay and lookup paths resolve relative to this file.
    #[arg(long)]
    chain: PathBuf,

    /// Output image path (`.png`, `.jpg` or `.jpeg`).
    #[arg(long)]
    out: PathBuf,

    /// Backend to use.
    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,

    /// JPEG quality when writing a JPEG.
    #[arg(long, default_value_t = 90)]
    jpeg_quality: u8,
}

#[derive(Parser, Debug)]
struct IdentityLutArgs {
    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Cpu,
    Gpu,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Apply(args) => cmd_apply(args),
        Command::IdentityLut(args) => cmd_identity_lut(args),
    }
}

fn output_format(path: &Path) -> anyhow::Result<luma::PictureFileFormat> {
    luma::PictureFileFormat::from_path(path).with_context(|| {
        format!(
            "cannot infer an image format from '{}' (use .png, .jpg or .jpeg)",
            path.display()
        )
    })
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write image '{}'", path.display()))
}

fn cmd_apply(args: ApplyArgs) -> anyhow::Result<()> {
    let format = output_format(&args.out)?;

    let chain = luma::FilterChain::from_path(&args.chain)
        .with_context(|| format!("load filter chain '{}'", args.chain.display()))?;
    chain.validate()?;

    let input = image::open(&args.in_path)
        .with_context(|| format!("open image '{}'", args.in_path.display()))?
        .to_rgba8();

    let backend = match args.backend {
        BackendChoice::Cpu => luma::BackendKind::Cpu,
        BackendChoice::Gpu => luma::BackendKind::Gpu,
    };
    let mut pipeline = luma::Pipeline::with_opts(luma::PipelineOpts { backend })?;

    let chain_dir = args.chain.parent().unwrap_or_else(|| Path::new("."));
    let built = chain
        .build(&mut pipeline, chain_dir)
        .with_context(|| "build filter chain")?;

    let filtered = luma::filter_image(&mut pipeline, &input, &built.operations)?;
    let encoded = luma::outputs::picture::encode_image(&filtered, format, args.jpeg_quality)?;
    write_output(&args.out, &encoded)?;

    eprintln!(
        "wrote {} ({}x{}, {} steps)",
        args.out.display(),
        filtered.width(),
        filtered.height(),
        built.operations.len()
    );
    Ok(())
}

fn cmd_identity_lut(args: IdentityLutArgs) -> anyhow::Result<()> {
    let lut = luma::operations::lookup::identity_lookup_image();
    let encoded = luma::outputs::picture::encode_image(&lut, luma::PictureFileFormat::Png, 100)?;
    write_output(&args.out, &encoded)?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}
