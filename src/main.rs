use std::{fs, path::PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use sqlite_inspect::{
    Database, DecodeOptions, Page, PageKind, PageNumber,
    page::{BTreePage, cell::Cell},
};
use tracing_subscriber::{EnvFilter, fmt};

/// Dump the structure of an SQLite database file.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Database file to inspect.
    path: PathBuf,

    /// Print the full contents of a single page.
    #[arg(long, value_name = "N")]
    page: Option<u32>,

    /// Decode pages across multiple threads.
    #[arg(long)]
    parallel: bool,

    /// Reassemble every cell payload by following its overflow chain.
    #[arg(long)]
    payloads: bool,

    /// Only mark the first page of each overflow chain.
    #[arg(long)]
    no_follow_overflow: bool,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();

    let buffer =
        fs::read(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    let options = DecodeOptions {
        parallel: args.parallel,
        follow_overflow_chains: !args.no_follow_overflow,
    };
    let db = Database::decode_with(&buffer, &options)
        .with_context(|| format!("decoding {}", args.path.display()))?;

    if let Some(number) = args.page {
        let Some(page) = db.get(number) else {
            bail!("page {number} is not in the database ({} pages)", db.page_count());
        };
        print_page(page);
    } else {
        print_header(&db);
        println!();
        for page in db.pages() {
            println!(
                "{:>6}  {:<15} {}",
                page.number.get(),
                page.page_type().to_string(),
                summary(page)
            );
        }
    }

    if args.payloads {
        println!();
        print_payloads(&db, args.page);
    }

    if !db.warnings.is_empty() {
        println!();
        println!("warnings:");
        for warning in &db.warnings {
            println!("  {warning}");
        }
    }

    Ok(())
}

fn print_header(db: &Database) {
    let header = &db.header;
    let (major, minor, patch) = header.sqlite_version();

    println!("page size:          {}", header.page_size.get());
    println!("usable size:        {}", header.usable_size());
    println!(
        "page count:         {} (header: {})",
        db.page_count(),
        header.page_count
    );
    println!(
        "freelist:           {} pages, first trunk {}",
        header.total_freelist_pages,
        optional_page(header.first_freelist_page)
    );
    println!(
        "file format:        write {:?}, read {:?}",
        header.write_version(),
        header.read_version()
    );
    println!(
        "schema:             cookie {}, format {:?}",
        header.schema_cookie,
        header.schema_format()
    );
    println!("text encoding:      {:?}", header.encoding());
    println!("change counter:     {}", header.file_change_counter);
    println!("sqlite version:     {major}.{minor}.{patch}");
}

fn summary(page: &Page) -> String {
    fn btree<'a, C: Cell<'a>>(page: &BTreePage<'a, C>) -> String {
        let errors = page.errors().count();
        let mut summary = format!("{} cells", page.cells.len());
        if errors > 0 {
            summary.push_str(&format!(", {errors} invalid"));
        }
        if let Some(right_child) = page.header.right_child {
            summary.push_str(&format!(", right child {right_child}"));
        }
        summary
    }

    match &page.kind {
        PageKind::TableInterior(page) => btree(page),
        PageKind::TableLeaf(page) => btree(page),
        PageKind::IndexInterior(page) => btree(page),
        PageKind::IndexLeaf(page) => btree(page),
        PageKind::FreeTrunk(trunk) => format!(
            "{} leaves, next trunk {}",
            trunk.leaves.len(),
            optional_page(trunk.next_trunk)
        ),
        PageKind::FreeLeaf(leaf) => format!("trunk {}", leaf.trunk),
        PageKind::Overflow(overflow) => format!(
            "from page {}, next {}",
            overflow.referrer,
            optional_page(overflow.next_page)
        ),
        PageKind::Unknown(unknown) => unknown.reason.to_string(),
    }
}

fn optional_page(page: Option<PageNumber>) -> String {
    page.map_or_else(|| "-".to_string(), |page| page.to_string())
}

fn print_page(page: &Page) {
    println!("page {} ({})", page.number, page.page_type());

    fn cells<'a, C: Cell<'a>>(page: &BTreePage<'a, C>) {
        println!("  header: {:?}", page.header);
        for (i, pointer) in page.cell_pointers.iter().enumerate() {
            match pointer {
                Ok(pointer) => println!(
                    "  pointer {i} @ {:#06x}: {:#06x}",
                    pointer.offset, pointer.value
                ),
                Err(e) => println!("  pointer {i}: {e}"),
            }
        }
        for (i, cell) in page.cells.iter().enumerate() {
            match cell {
                Ok(cell) => {
                    print!("  cell {i} @ {:#06x} ({} bytes)", cell.offset(), cell.length());
                    if let Some(left_child) = cell.left_child() {
                        print!(", left child {left_child}");
                    }
                    if let Some(payload) = cell.payload() {
                        print!(
                            ", payload {} bytes ({} local, overflow {})",
                            payload.size,
                            payload.local.len(),
                            optional_page(payload.overflow_page)
                        );
                    }
                    println!();
                }
                Err(e) => println!("  cell {i}: {e}"),
            }
        }
    }

    match &page.kind {
        PageKind::TableInterior(page) => cells(page),
        PageKind::TableLeaf(page) => cells(page),
        PageKind::IndexInterior(page) => cells(page),
        PageKind::IndexLeaf(page) => cells(page),
        PageKind::FreeTrunk(trunk) => {
            println!("  next trunk: {}", optional_page(trunk.next_trunk));
            println!("  declared leaves: {}", trunk.count);
            for entry in &trunk.leaves {
                println!("  leaf @ {:#06x}: {}", entry.offset, entry.page);
            }
        }
        _ => println!("  {}", summary(page)),
    }
}

fn print_payloads(db: &Database, only: Option<u32>) {
    fn payloads<'a, C: Cell<'a>>(db: &Database, number: PageNumber, page: &BTreePage<'a, C>) {
        for (i, cell) in page.cells.iter().enumerate() {
            let Some(payload) = cell.as_ref().ok().and_then(|cell| cell.payload()) else {
                continue;
            };

            match db.read_payload(number, payload) {
                Ok(bytes) => println!("{:>6}  cell {i}: {} bytes", number.get(), bytes.len()),
                Err(e) => println!("{:>6}  cell {i}: {e}", number.get()),
            }
        }
    }

    for page in db.pages() {
        if only.is_some_and(|only| only != page.number.get()) {
            continue;
        }

        match &page.kind {
            PageKind::TableLeaf(btree) => payloads(db, page.number, btree),
            PageKind::IndexInterior(btree) => payloads(db, page.number, btree),
            PageKind::IndexLeaf(btree) => payloads(db, page.number, btree),
            _ => {}
        }
    }
}
