//! CLI front-end: parses a PE image and prints a summary of what was found.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use squidge::apiset::EmptySchema;
use squidge::gate::NullDebugInfoParser;
use squidge::symbols::NullPublisher;
use squidge::{AnalyzerConfig, ParsedImage};

#[derive(Parser, Debug)]
#[clap(name = "squidge-pe", about = "Raw PE/COFF image analyzer")]
struct Args {
    /// Path to the executable image to analyze.
    file: PathBuf,

    /// Skip the full-image string-literal scan.
    #[clap(long)]
    no_strings: bool,

    /// Minimum length for a reported string literal.
    #[clap(long, default_value_t = squidge::config::DEFAULT_LOAD_STRING_LENGTH)]
    min_string_length: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = AnalyzerConfig {
        disable_load_strings: args.no_strings,
        load_string_length: args.min_string_length,
    };

    let mut publisher = NullPublisher;
    let image = match ParsedImage::from_path(
        &args.file,
        None,
        &config,
        &EmptySchema,
        0,
        &mut publisher,
        &NullDebugInfoParser,
    ) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("{}: {}", args.file.display(), err);
            return ExitCode::FAILURE;
        }
    };

    println!("{}", image.image_name);
    println!("  bitness: {}", if image.is_64 { "64-bit" } else { "32-bit" });
    println!("  preferred base: {}", image.preferred_image_base);
    println!("  sections: {}", image.sections.len());
    for section in &image.sections {
        println!(
            "    {:<12} va={} vsize={:#x} raw={:#x} rawsize={:#x}",
            section.display_name,
            section.virtual_address,
            section.virtual_size,
            section.pointer_to_raw_data,
            section.size_of_raw_data,
        );
    }

    if let Some(exports) = &image.exports {
        println!("  exports: {} ({})", exports.entries.len(), exports.original_name);
    }
    println!("  imports: {}", image.imports.len());
    println!("  delay imports: {}", image.delay_imports.len());
    println!("  bound imports: {}", image.bound_imports.len());
    println!("  entry points: {}", image.entry_points.len());
    println!("  relocations patched: {}", image.relocations.patched_count());
    if !args.no_strings {
        println!("  strings found: {}", image.strings.len());
    }
    if let Some(il_only) = image.com_plus_il_only {
        println!("  COM+ IL-only: {}", il_only);
    }
    if let Some(link) = &image.debug_link {
        println!(
            "  debug link: {} (companion {})",
            link.file_name,
            if link.companion_exists { "found" } else { "missing" }
        );
    }
    if !image.debug_data.is_empty() {
        println!("  debug data: {:?}", image.debug_data);
    }

    ExitCode::SUCCESS
}
