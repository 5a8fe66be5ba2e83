use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use quire_printing::{
    available_devices, default_device_name, render_preview_png, Anchor, Color, DeviceSettingsBlob,
    DrawingSurface, DuplexMode, FontSize, JobCommand, LogicalMapping, LogicalUnit, Orientation,
    Outcome, PaperId, PrinterSession, RecordingSurface, ResyncPolicy, SessionConfig,
    SessionConfigStore, SizeTenths, Spooler, VirtualSpooler,
};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "quire-cli",
    about = "Inspect virtual printers and run print jobs against them",
    author,
    version
)]
struct Cli {
    /// 裝置目錄 JSON；預設使用內建裝置。 / Device catalog JSON (defaults to the built-in devices).
    #[arg(long, global = true, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// 工作階段設定檔。 / Session configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 提高記錄詳細程度（可重複）。 / Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出可用裝置。 / List available devices.
    Devices,
    /// 顯示裝置能力與頁面幾何。 / Show device capabilities and page geometry.
    Info(InfoArgs),
    /// 執行示範列印工作。 / Run a demo print job.
    Print(PrintArgs),
    /// 匯出或檢視裝置設定資料。 / Export or inspect device settings blobs.
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// 檢視或更新工作階段設定。 / Show or update the session configuration.
    Config(ConfigArgs),
}

#[derive(Args)]
struct SettingsOverrides {
    /// 份數。 / Number of copies.
    #[arg(long)]
    copies: Option<u16>,

    /// 橫向列印。 / Print in landscape orientation.
    #[arg(long)]
    landscape: bool,

    /// 標準紙張代碼。 / Standard paper id.
    #[arg(long, value_name = "ID", conflicts_with = "custom")]
    paper: Option<u16>,

    /// 自訂紙張尺寸（0.1 mm），例如 2100x2970。 / Custom paper size in tenths of a millimetre, e.g. 2100x2970.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    custom: Option<SizeTenths>,

    /// 雙面模式。 / Duplex mode.
    #[arg(long, value_enum)]
    duplex: Option<DuplexChoice>,
}

#[derive(Args)]
struct InfoArgs {
    /// 裝置名稱；預設使用預設裝置。 / Device name (defaults to the default device).
    device: Option<String>,

    #[command(flatten)]
    overrides: SettingsOverrides,

    /// 以 JSON 輸出。 / Emit JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PrintArgs {
    /// 裝置名稱；預設使用預設裝置。 / Device name (defaults to the default device).
    device: Option<String>,

    /// 文件名稱。 / Document name.
    #[arg(long, default_value = "quire demo")]
    name: String,

    /// 頁數。 / Number of pages.
    #[arg(long, default_value_t = 1)]
    pages: u32,

    /// 將輸出導向檔案。 / Redirect spooled output to a file.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// 先套用匯出的設定資料。 / Apply an exported settings blob first.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(flatten)]
    overrides: SettingsOverrides,

    /// 繪圖邏輯單位。 / Logical unit used for drawing.
    #[arg(long, value_enum)]
    unit: Option<UnitChoice>,

    /// 邏輯原點位置。 / Where logical (0, 0) lands.
    #[arg(long, value_enum)]
    anchor: Option<AnchorChoice>,

    /// 在指定頁之後從外部刪除工作。 / Delete the job from outside after the given page.
    #[arg(long, value_name = "PAGE")]
    cancel_after: Option<u32>,

    /// 從指定頁起改為橫向。 / Switch to landscape from the given page on.
    #[arg(long, value_name = "PAGE")]
    landscape_from: Option<u32>,

    /// 將每頁預覽輸出為 PNG。 / Write a PNG preview of every page.
    #[arg(long, value_name = "DIR")]
    preview_dir: Option<PathBuf>,

    /// 預覽縮放百分比。 / Preview zoom in percent.
    #[arg(long, default_value_t = 25)]
    zoom: u32,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// 匯出裝置設定資料。 / Export a device settings blob.
    Export(SettingsExportArgs),
    /// 顯示設定資料內容。 / Show the contents of a settings blob.
    Show(SettingsShowArgs),
}

#[derive(Args)]
struct SettingsExportArgs {
    /// 裝置名稱。 / Device name.
    device: Option<String>,

    /// 輸出路徑。 / Output path.
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    #[command(flatten)]
    overrides: SettingsOverrides,
}

#[derive(Args)]
struct SettingsShowArgs {
    /// 設定資料檔。 / Settings blob file.
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

#[derive(Args)]
struct ConfigArgs {
    /// 分頁間重新套用設定的策略。 / When settings are reapplied between pages.
    #[arg(long, value_enum)]
    resync: Option<ResyncChoice>,

    /// 預設邏輯單位。 / Default logical unit.
    #[arg(long, value_enum)]
    unit: Option<UnitChoice>,

    /// 預設邏輯原點。 / Default logical anchor.
    #[arg(long, value_enum)]
    anchor: Option<AnchorChoice>,

    /// 預設裝置。 / Default device.
    #[arg(long, value_name = "NAME")]
    default_device: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum UnitChoice {
    #[value(name = "device")]
    Device,
    #[value(name = "hundredths-inch", alias = "loenglish")]
    HundredthsInch,
    #[value(name = "thousandths-inch", alias = "hienglish")]
    ThousandthsInch,
    #[value(name = "tenths-mm", alias = "lometric")]
    TenthsMillimeter,
    #[value(name = "hundredths-mm", alias = "himetric")]
    HundredthsMillimeter,
    Points,
    Twips,
}

impl From<UnitChoice> for LogicalUnit {
    fn from(choice: UnitChoice) -> Self {
        match choice {
            UnitChoice::Device => LogicalUnit::DeviceNative,
            UnitChoice::HundredthsInch => LogicalUnit::HundredthsInch,
            UnitChoice::ThousandthsInch => LogicalUnit::ThousandthsInch,
            UnitChoice::TenthsMillimeter => LogicalUnit::TenthsMillimeter,
            UnitChoice::HundredthsMillimeter => LogicalUnit::HundredthsMillimeter,
            UnitChoice::Points => LogicalUnit::Points,
            UnitChoice::Twips => LogicalUnit::Twips,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AnchorChoice {
    Page,
    Printable,
}

impl From<AnchorChoice> for Anchor {
    fn from(choice: AnchorChoice) -> Self {
        match choice {
            AnchorChoice::Page => Anchor::PhysicalPage,
            AnchorChoice::Printable => Anchor::PrintableArea,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ResyncChoice {
    Lazy,
    Eager,
}

impl From<ResyncChoice> for ResyncPolicy {
    fn from(choice: ResyncChoice) -> Self {
        match choice {
            ResyncChoice::Lazy => ResyncPolicy::Lazy,
            ResyncChoice::Eager => ResyncPolicy::Eager,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DuplexChoice {
    Off,
    LongEdge,
    ShortEdge,
}

impl From<DuplexChoice> for DuplexMode {
    fn from(choice: DuplexChoice) -> Self {
        match choice {
            DuplexChoice::Off => DuplexMode::Off,
            DuplexChoice::LongEdge => DuplexMode::LongEdge,
            DuplexChoice::ShortEdge => DuplexMode::ShortEdge,
        }
    }
}

fn parse_size(value: &str) -> Result<SizeTenths, String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width = width
        .trim()
        .parse::<i32>()
        .map_err(|err| format!("invalid width '{width}': {err}"))?;
    let height = height
        .trim()
        .parse::<i32>()
        .map_err(|err| format!("invalid height '{height}': {err}"))?;
    Ok(SizeTenths::new(width, height))
}

/// Spooler and configuration shared by every subcommand.
struct Environment {
    spooler: VirtualSpooler,
    config: SessionConfig,
    config_path: Option<PathBuf>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        catalog,
        config,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);
    let env = load_environment(catalog.as_deref(), config)?;
    match command {
        Commands::Devices => list_devices(&env),
        Commands::Info(args) => execute_info(args, &env),
        Commands::Print(args) => execute_print(args, &env),
        Commands::Settings(SettingsCommand::Export(args)) => export_settings(args, &env),
        Commands::Settings(SettingsCommand::Show(args)) => show_settings(args),
        Commands::Config(args) => execute_config(args, &env),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_environment(catalog: Option<&Path>, config_path: Option<PathBuf>) -> Result<Environment> {
    let spooler = match catalog {
        Some(path) => VirtualSpooler::from_catalog_file(path)
            .with_context(|| format!("failed to load device catalog {}", path.display()))?,
        None => VirtualSpooler::default(),
    };
    let config = match &config_path {
        Some(path) => SessionConfigStore::load(path)
            .with_context(|| format!("failed to load session config {}", path.display()))?
            .config()
            .clone(),
        None => SessionConfig::default(),
    };
    debug!(?config, "environment loaded");
    Ok(Environment {
        spooler,
        config,
        config_path,
    })
}

fn resolve_device(env: &Environment, requested: Option<&str>) -> Result<String> {
    if let Some(name) = requested {
        return Ok(name.to_string());
    }
    if let Some(name) = &env.config.default_device {
        return Ok(name.clone());
    }
    default_device_name(&env.spooler).context("no device given and no default device configured")
}

fn open_session<C: DrawingSurface>(
    env: &Environment,
    device: &str,
    consumer: C,
) -> Result<PrinterSession<VirtualSpooler, C>> {
    PrinterSession::open_with_surface(env.spooler.clone(), device, env.config.clone(), consumer)
        .with_context(|| format!("failed to open device '{device}'"))
}

fn apply_overrides<S: Spooler, C: DrawingSurface>(
    session: &mut PrinterSession<S, C>,
    overrides: &SettingsOverrides,
) -> Result<()> {
    if let Some(copies) = overrides.copies {
        session.set_copies(copies).context("failed to set copies")?;
    }
    if overrides.landscape {
        session
            .set_orientation(Orientation::Landscape)
            .context("failed to set orientation")?;
    }
    if let Some(paper) = overrides.paper {
        session
            .set_paper_size(PaperId(paper))
            .context("failed to set paper size")?;
    }
    if let Some(size) = overrides.custom {
        session
            .set_custom_paper_size(size)
            .context("failed to set custom paper size")?;
    }
    if let Some(duplex) = overrides.duplex {
        session
            .set_duplex(duplex.into())
            .context("failed to set duplex mode")?;
    }
    Ok(())
}

fn list_devices(env: &Environment) -> Result<()> {
    let devices = available_devices(&env.spooler).context("failed to enumerate devices")?;
    let default = env
        .spooler
        .default_device()
        .ok()
        .flatten()
        .or_else(|| env.config.default_device.clone());
    if devices.is_empty() {
        println!("No devices available.");
        return Ok(());
    }
    println!("Available devices:");
    for name in devices {
        let marker = if default.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {name}");
    }
    Ok(())
}

fn execute_info(args: InfoArgs, env: &Environment) -> Result<()> {
    let device = resolve_device(env, args.device.as_deref())?;
    let mut session = PrinterSession::open(env.spooler.clone(), &device, env.config.clone())
        .with_context(|| format!("failed to open device '{device}'"))?;
    apply_overrides(&mut session, &args.overrides)?;

    let capabilities: Vec<&str> = session
        .capabilities()
        .capabilities()
        .map(|capability| capability.name())
        .collect();
    let page = session.page_size()?;
    let margins = session.margins()?;
    let area = session.printable_area()?;
    let dpi = session.resolution()?;
    let fonts = session.fonts()?;
    let papers = session.paper_sizes()?;
    let sources = session.paper_sources()?;
    let media = session.media_types()?;

    if args.json {
        let report = json!({
            "device": session.device_name(),
            "capabilities": capabilities,
            "max_copies": session.limits().max_copies,
            "page_size": page,
            "margins": margins,
            "printable_area": area,
            "resolution": dpi,
            "fonts": fonts,
            "papers": papers,
            "paper_sources": sources,
            "media_types": media,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Device: {}", session.device_name());
    println!("Capabilities: {}", capabilities.join(", "));
    println!("Max copies: {}", session.limits().max_copies);
    println!(
        "Page size: {} x {} (0.1 mm)",
        page.width, page.height
    );
    println!(
        "Margins: left {} top {} right {} bottom {} (0.1 mm)",
        margins.left, margins.top, margins.right, margins.bottom
    );
    println!(
        "Printable area: {} x {} at ({}, {}) (0.1 mm)",
        area.width, area.height, area.x, area.y
    );
    println!("Resolution: {} x {} dpi", dpi.x, dpi.y);
    println!("Fonts: {}", fonts.join(", "));
    println!("Papers:");
    for paper in papers {
        println!(
            "  {:>4}  {} ({} x {})",
            paper.id.0, paper.name, paper.size.width, paper.size.height
        );
    }
    if !sources.is_empty() {
        println!("Paper sources:");
        for source in sources {
            println!("  {:>4}  {}", source.id.0, source.name);
        }
    }
    if !media.is_empty() {
        println!("Media types:");
        for entry in media {
            println!("  {:>4}  {}", entry.id.0, entry.name);
        }
    }
    Ok(())
}

fn execute_print(args: PrintArgs, env: &Environment) -> Result<()> {
    if args.pages == 0 {
        bail!("--pages must be at least 1");
    }
    let device = resolve_device(env, args.device.as_deref())?;
    let mut session = open_session(env, &device, RecordingSurface::new())?;

    if let Some(path) = &args.settings {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        session
            .set_settings_bytes(&bytes)
            .with_context(|| format!("failed to apply settings from {}", path.display()))?;
    }
    apply_overrides(&mut session, &args.overrides)?;
    if args.unit.is_some() || args.anchor.is_some() {
        let unit = args.unit.map_or(session.logical_unit(), LogicalUnit::from);
        let anchor = args.anchor.map_or(env.config.anchor, Anchor::from);
        session.set_logical_unit(unit, anchor)?;
    }

    if session.begin_job(&args.name, args.output.clone())? == Outcome::Declined {
        println!("Job start was declined by '{device}'.");
        return Ok(());
    }
    let job = session
        .job_id()
        .ok_or_else(|| anyhow!("spooler did not assign a job id"))?;
    println!("Started {job} on '{device}'");

    let mut completed = true;
    for page in 1..=args.pages {
        if page > 1 {
            if args.landscape_from == Some(page) {
                session
                    .set_orientation(Orientation::Landscape)
                    .context("failed to switch orientation")?;
            }
            if session.new_page()? == Outcome::Declined {
                println!("{job} was cancelled before page {page}");
                completed = false;
                break;
            }
        }
        let total = args.pages;
        session.draw(|surface, mapping| draw_demo_page(surface, mapping, page, total))?;
        if args.cancel_after == Some(page) {
            session.control_job(JobCommand::Delete)?;
        }
    }
    if completed {
        match session.end_doc()? {
            Outcome::Proceeded => println!("Finished {job}: {} page(s)", session.page_number()),
            Outcome::Declined => println!("{job} was cancelled before it finished"),
        }
    }

    if let Some(status) = session.job_status()? {
        println!(
            "Spooler status: {:?}, {} page(s) printed",
            status.status, status.pages_printed
        );
    }
    if let Some(output) = &args.output {
        if output.exists() {
            println!("Job record written to {}", output.display());
        }
    }
    if let Some(dir) = &args.preview_dir {
        write_previews(session.consumer(), dir, args.zoom)?;
    }
    Ok(())
}

fn draw_demo_page(surface: &mut RecordingSurface, mapping: &LogicalMapping, page: u32, total: u32) {
    let (width, height) = mapping.logical_extent();
    let (left, top) = mapping.to_logical(0.0, 0.0);
    let inset = width.min(height) * 0.04;
    surface.frame(inset, Color::BLACK);
    let body = FontSize::from_points(12.0);
    let line = body.to_logical(mapping) * 1.5;
    surface.text(
        left + inset * 2.0,
        top + inset * 2.0,
        &format!("Page {page} of {total}"),
        "Helvetica",
        FontSize::from_points(18.0),
    );
    surface.fill_rect(
        left + inset * 2.0,
        top + inset * 2.0 + line * 2.0,
        width - inset * 4.0,
        line * 0.25,
        Color::new(0.2, 0.2, 0.2, 1.0),
    );
    surface.text(
        left + inset * 2.0,
        top + height - inset * 2.0 - line,
        &format!("{:?} units", mapping.unit),
        "Helvetica",
        body,
    );
}

fn write_previews(surface: &RecordingSurface, dir: &Path, zoom: u32) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (index, page) in surface.pages().iter().enumerate() {
        let entry = render_preview_png(page, zoom)
            .with_context(|| format!("failed to render preview of page {}", index + 1))?;
        let path = dir.join(format!("page-{:03}.png", index + 1));
        fs::write(&path, &entry.data)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!(
            "Preview {} ({} x {})",
            path.display(),
            entry.width_px,
            entry.height_px
        );
    }
    Ok(())
}

fn export_settings(args: SettingsExportArgs, env: &Environment) -> Result<()> {
    let device = resolve_device(env, args.device.as_deref())?;
    let mut session = PrinterSession::open(env.spooler.clone(), &device, env.config.clone())
        .with_context(|| format!("failed to open device '{device}'"))?;
    apply_overrides(&mut session, &args.overrides)?;
    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let bytes = session.settings_bytes();
    fs::write(&args.output, &bytes)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!(
        "Exported settings for '{device}' to {} ({} bytes)",
        args.output.display(),
        bytes.len()
    );
    Ok(())
}

fn show_settings(args: SettingsShowArgs) -> Result<()> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let blob = DeviceSettingsBlob::from_bytes(&bytes)
        .with_context(|| format!("failed to decode {}", args.input.display()))?;
    println!("Device: {}", blob.device());
    println!("Driver version: {:#06x}", blob.driver_version());
    println!("Fields: {:?}", blob.present_fields());
    println!("Orientation: {:?}", blob.orientation());
    println!("Paper: {}", blob.paper().0);
    println!("Copies: {}", blob.copies());
    println!("Duplex: {:?}", blob.duplex());
    println!("Driver-private bytes: {}", blob.driver_private().len());
    Ok(())
}

fn execute_config(args: ConfigArgs, env: &Environment) -> Result<()> {
    let Some(path) = &env.config_path else {
        let payload = serde_json::to_string_pretty(&env.config)?;
        println!("{payload}");
        return Ok(());
    };
    let mut store = SessionConfigStore::load(path)
        .with_context(|| format!("failed to load session config {}", path.display()))?;
    let changed = args.resync.is_some()
        || args.unit.is_some()
        || args.anchor.is_some()
        || args.default_device.is_some();
    if changed {
        store
            .update(|config| {
                if let Some(resync) = args.resync {
                    config.resync = resync.into();
                }
                if let Some(unit) = args.unit {
                    config.logical_unit = unit.into();
                }
                if let Some(anchor) = args.anchor {
                    config.anchor = anchor.into();
                }
                if let Some(device) = args.default_device {
                    config.default_device = Some(device);
                }
            })
            .with_context(|| format!("failed to save session config {}", path.display()))?;
    }
    println!("{}", serde_json::to_string_pretty(store.config())?);
    Ok(())
}
