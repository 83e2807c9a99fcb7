#![deny(rust_2018_idioms)]

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, terminal};
use spacedock::selection::{Menu, Selection};
use spacedock::usb::{RCM_PRODUCT_ID, RCM_VENDOR_ID};
use spacedock::watcher::{self, DeviceFilter, Watcher};
use spacedock::{catalog, error, info, macros, ok, warn};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Cadence of the directional input poll.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Interactive RCM payload injector for Tegra X1 devices.
#[derive(argh::FromArgs)]
struct Arguments {
    /// directory scanned for payloads (defaults to the current directory).
    #[argh(option, short = 'r', default = "PathBuf::from(\".\")")]
    root: PathBuf,

    /// directory holding the bundled intermezzo and fusee payloads
    /// (defaults to <root>/resources).
    #[argh(option)]
    resources: Option<PathBuf>,

    /// override the TegraRCM vendor ID.
    #[argh(option, short = 'V')]
    vendor_id: Option<u16>,
    /// override the TegraRCM product ID.
    #[argh(option, short = 'P')]
    product_id: Option<u16>,
}

fn main() {
    let args = argh::from_env::<Arguments>();
    if let Err(err) = run(args) {
        error!("Failed", "{}", err);
        std::process::exit(1);
    }
}

fn run(args: Arguments) -> Result<(), Box<dyn std::error::Error>> {
    let resources = args
        .resources
        .clone()
        .unwrap_or_else(|| args.root.join("resources"));

    // The relocator is read exactly once; a missing file is tolerated
    // and the assembler zero-fills its region on every injection.
    let intermezzo = std::fs::read(resources.join(catalog::INTERMEZZO_FILE)).ok();
    if intermezzo.is_none() {
        warn!(
            "Warning",
            "no {} in {}, injected images will lack a relocator",
            catalog::INTERMEZZO_FILE,
            resources.display()
        );
    }

    let entries = catalog::enumerate(&args.root, &resources);
    if entries.is_empty() {
        warn!("Warning", "no payloads found beneath {}", args.root.display());
    }

    let selection = Selection::new();
    let mut menu = Menu::new(entries, selection.clone());

    let filter = DeviceFilter {
        vendor_id: args.vendor_id.unwrap_or(RCM_VENDOR_ID),
        product_id: args.product_id.unwrap_or(RCM_PRODUCT_ID),
    };

    // All fatal: without a USB context, attach notifications, or a
    // watcher thread the tool cannot do anything useful.
    let (watcher, cancel) = Watcher::new(filter, selection, intermezzo)?;
    let watcher_thread = watcher::spawn(watcher)?;

    let result = run_ui(&mut menu);

    // The watcher must be fully stopped before shared state goes away.
    cancel.cancel();
    if watcher_thread.join().is_err() {
        error!("Failed", "watcher thread panicked");
    }

    result
}

fn run_ui(menu: &mut Menu) -> Result<(), Box<dyn std::error::Error>> {
    info!("spacedock", "interactive RCM payload injector");
    info!("Usage", "select a payload with up/down, press q or esc to exit");
    info!("Usage", "connect an RCM mode device via USB to inject the selection");

    terminal::enable_raw_mode()?;

    // The menu redraws over a fixed region starting at the current
    // cursor position.
    let result = cursor::position()
        .map_err(Into::into)
        .and_then(|origin| input_loop(menu, origin));

    terminal::disable_raw_mode()?;
    result
}

fn input_loop(menu: &mut Menu, origin: (u16, u16)) -> Result<(), Box<dyn std::error::Error>> {
    draw_menu(menu, origin)?;

    loop {
        if !event::poll(INPUT_POLL_INTERVAL)? {
            continue;
        }

        let key = match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => key,
            _ => continue,
        };

        match key.code {
            KeyCode::Up => {
                menu.select_previous();
                draw_menu(menu, origin)?;
            }
            KeyCode::Down => {
                menu.select_next();
                draw_menu(menu, origin)?;
            }
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            _ => {}
        }
    }

    ok!("Exiting", "waiting for the watcher to stop...");
    Ok(())
}

/// Redraws the payload menu over its fixed screen region. The whole
/// redraw, clear included, runs under the output lock so watcher
/// messages never land mid-menu.
fn draw_menu(menu: &Menu, origin: (u16, u16)) -> io::Result<()> {
    macros::locked(|| {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            cursor::MoveTo(origin.0, origin.1),
            terminal::Clear(terminal::ClearType::FromCursorDown)
        )?;

        print!("Available payloads:\r\n");
        for (i, entry) in menu.entries().iter().enumerate() {
            let marker = if i == menu.index() { '>' } else { ' ' };
            print!(" {}{}\r\n", marker, entry.label());
        }

        match menu.entries().get(menu.index()) {
            Some(entry) => print!("\r\nSelected payload: {}\r\n", entry.label()),
            None => print!("\r\nNo payloads available.\r\n"),
        }

        stdout.flush()
    })
}
