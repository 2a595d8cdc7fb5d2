use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use mattecomp::{
    BackendKind, Bitmap, Config, FrameRGBA, ManualClock, MattingCompositor,
    OutputSize, ParallaxCompositor, RenderLoop, Sprite, SpriteId, SpriteTransform,
    StickerCompositor,
};

#[derive(Parser, Debug)]
#[command(name = "mattecomp", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Key a foreground over a background image and write one PNG.
    Matte(MatteArgs),
    /// Render a parallax sequence following a list of offsets.
    Parallax(ParallaxArgs),
    /// Place sticker images over a base image from a JSON layout.
    Stickers(StickersArgs),
}

#[derive(Parser, Debug)]
struct MatteArgs {
    /// Foreground image containing the key color.
    #[arg(long)]
    foreground: PathBuf,

    /// Image shown where the foreground matches the key.
    #[arg(long)]
    background: PathBuf,

    /// Optional config JSON providing matting defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Key color as `r,g,b` in [0, 1].
    #[arg(long, value_delimiter = ',', num_args = 3)]
    key: Option<Vec<f32>>,

    #[arg(long)]
    similarity: Option<f32>,

    #[arg(long)]
    smoothness: Option<f32>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,
}

#[derive(Parser, Debug)]
struct ParallaxArgs {
    /// Config JSON; its `parallax` section names the layer images.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    background: Option<PathBuf>,

    #[arg(long)]
    depth: Option<PathBuf>,

    #[arg(long)]
    foreground: Option<PathBuf>,

    /// Target offset `x,y`; repeat to build a path. Offsets are spread evenly over the frames.
    #[arg(long = "offset", value_parser = parse_offset)]
    offsets: Vec<[f32; 2]>,

    /// Number of frames to render.
    #[arg(long, default_value_t = 8)]
    frames: u64,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Output directory for `frame_NNNN.png`.
    #[arg(long)]
    out_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,
}

#[derive(Parser, Debug)]
struct StickersArgs {
    /// Base image under the stickers.
    #[arg(long)]
    base: PathBuf,

    /// Sticker layout JSON.
    #[arg(long)]
    layout: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Cpu,
    Gpu,
}

impl From<BackendChoice> for BackendKind {
    fn from(choice: BackendChoice) -> Self {
        match choice {
            BackendChoice::Cpu => BackendKind::Cpu,
            BackendChoice::Gpu => BackendKind::Gpu,
        }
    }
}

/// Sticker layout file. Image paths resolve against the layout file.
#[derive(Debug, serde::Deserialize)]
struct StickerLayout {
    /// Surface the transforms are expressed in; defaults to the base image size.
    #[serde(default)]
    surface: Option<[u32; 2]>,
    sprites: Vec<StickerEntry>,
    /// Ids raised to the front after placement, in order.
    #[serde(default)]
    front: Vec<u64>,
}

#[derive(Debug, serde::Deserialize)]
struct StickerEntry {
    id: u64,
    image: PathBuf,
    #[serde(flatten)]
    transform: SpriteTransform,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Matte(args) => cmd_matte(args),
        Command::Parallax(args) => cmd_parallax(args),
        Command::Stickers(args) => cmd_stickers(args),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_offset(s: &str) -> Result<[f32; 2], String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f32>()
            .map_err(|e| format!("invalid offset component '{v}': {e}"))
    };
    Ok([parse(x)?, parse(y)?])
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("load config '{}'", path.display())),
        None => Ok(Config::default()),
    }
}

fn load_image(path: &Path) -> anyhow::Result<Bitmap> {
    mattecomp::load_bitmap(path).with_context(|| format!("load image '{}'", path.display()))
}

fn write_png(frame: &FrameRGBA, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    mattecomp::save_png(frame, out).with_context(|| format!("write png '{}'", out.display()))?;
    eprintln!("wrote {}", out.display());
    Ok(())
}

fn make_loop(
    backend: BackendChoice,
    config: &Config,
    size: OutputSize,
    compositor: Box<dyn mattecomp::Compositor>,
) -> anyhow::Result<RenderLoop> {
    let mut settings = config.device_settings();
    settings.size = size;
    Ok(RenderLoop::from_settings(
        backend.into(),
        &settings,
        compositor,
    )?)
}

fn cmd_matte(args: MatteArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(key) = &args.key {
        let [r, g, b] = <[f32; 3]>::try_from(key.as_slice())
            .map_err(|_| anyhow::anyhow!("--key expects three components"))?;
        config.matting.key_color = [r, g, b];
    }
    if let Some(similarity) = args.similarity {
        config.matting.similarity = similarity;
    }
    if let Some(smoothness) = args.smoothness {
        config.matting.smoothness = smoothness;
    }
    config.validate()?;

    let foreground = load_image(&args.foreground)?;
    let background = load_image(&args.background)?;

    let compositor = MattingCompositor::new(config.matting);
    compositor.handle().set_background_image(background);

    let size = OutputSize::new(foreground.width, foreground.height);
    let mut render = make_loop(args.backend, &config, size, Box::new(compositor))?;
    // The camera input is sampled transposed; pre-transpose so the still reads upright.
    let frame = render.render_frame(Some(&foreground.transposed()))?;
    render.shutdown();

    write_png(&frame, &args.out)
}

fn cmd_parallax(args: ParallaxArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if args.background.is_some() {
        config.parallax.background = args.background;
    }
    if args.depth.is_some() {
        config.parallax.depth = args.depth;
    }
    if args.foreground.is_some() {
        config.parallax.foreground = args.foreground;
    }
    if let Some(width) = args.width {
        config.render.width = width;
    }
    if let Some(height) = args.height {
        config.render.height = height;
    }
    config.validate()?;

    let clock = Arc::new(ManualClock::new(0));
    let compositor = ParallaxCompositor::new(clock.clone());
    let handle = compositor.handle();
    for (slot, bitmap) in config.parallax.load() {
        handle.set_layer(slot, bitmap);
    }

    let offsets = if args.offsets.is_empty() {
        vec![[0.0, 0.0]]
    } else {
        args.offsets
    };
    let hold = args.frames.div_ceil(offsets.len() as u64).max(1);
    let target_for = |frame: u64| offsets[((frame / hold) as usize).min(offsets.len() - 1)];
    let [x, y] = target_for(0);
    handle.set_target_offset(x, y);

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("create output dir '{}'", args.out_dir.display()))?;

    let interval = config.frame_interval();
    let step_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    let mut render = make_loop(
        args.backend,
        &config,
        config.output_size(),
        Box::new(compositor),
    )?;
    let out_dir = args.out_dir.clone();
    let rendered = render.run(interval, Some(args.frames), |index, frame| {
        let out = out_dir.join(format!("frame_{index:04}.png"));
        mattecomp::save_png(&frame, &out)?;
        clock.advance(step_ms);
        let next = index + 1;
        if next % hold == 0 {
            let [x, y] = target_for(next);
            handle.set_target_offset(x, y);
        }
        Ok(())
    })?;
    render.shutdown();

    eprintln!("wrote {rendered} frames to {}", args.out_dir.display());
    Ok(())
}

fn cmd_stickers(args: StickersArgs) -> anyhow::Result<()> {
    let f = File::open(&args.layout)
        .with_context(|| format!("open layout '{}'", args.layout.display()))?;
    let layout: StickerLayout =
        serde_json::from_reader(BufReader::new(f)).with_context(|| "parse layout JSON")?;
    let root = args.layout.parent().unwrap_or_else(|| Path::new("."));

    let base = load_image(&args.base)?;
    let surface = match layout.surface {
        Some([w, h]) => OutputSize::new(w, h),
        None => OutputSize::new(base.width, base.height),
    };

    let mut sprites = Vec::with_capacity(layout.sprites.len());
    for entry in layout.sprites {
        let bitmap = load_image(&root.join(&entry.image))?;
        sprites.push(Sprite::new(SpriteId(entry.id), bitmap, entry.transform));
    }

    let compositor = StickerCompositor::new();
    let handle = compositor.handle();
    handle.bind(sprites, surface);
    for id in layout.front {
        handle.bring_to_front(SpriteId(id));
    }

    let config = Config::default();
    let size = OutputSize::new(base.width, base.height);
    let mut render = make_loop(args.backend, &config, size, Box::new(compositor))?;
    let frame = render.render_frame(Some(&base))?;
    render.shutdown();

    write_png(&frame, &args.out)
}
