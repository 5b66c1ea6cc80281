use std::{
    env,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Seek, SeekFrom, Write},
    os::unix::net::UnixStream,
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use garak::{
    config::{default_path, Config, Output},
    ipc::socket_path,
    model::fmt_time,
};
use serde_json::{json, Value};

fn output() -> Output {
    Config::load(&default_path())
        .map(|cfg| cfg.output)
        .unwrap_or_default()
}

fn usage() {
    eprintln!(
        "{}",
        r#"Usage:
  garakc play-pause
  garakc next
  garakc previous
  garakc set-position <seconds>
  garakc status
  garakc watch [--format <fmt>] [--truncate <n>] [--pango-escape]

watch placeholders: {artist} {title} {album} {status} {position} {length} {sep}
  default format "{artist}{sep}{title}"
  where sep = " - " if both artist & title are non-empty, else ""

--pango-escape   Escape Pango markup: & < > ' " → &amp; &lt; &gt; &apos; &quot;
"#
    );
}

fn send_over_socket(payload: &str) -> Result<bool> {
    let path = socket_path();
    let mut stream =
        UnixStream::connect(&path).with_context(|| format!("connecting to {}", path.display()))?;
    stream.write_all(payload.as_bytes())?;
    stream.write_all(b"\n")?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let reply: Value = serde_json::from_str(line.trim()).context("malformed reply")?;
    Ok(reply.get("ok").and_then(Value::as_bool).unwrap_or(false))
}

fn run_control(cmd: &str, args: &[String]) -> Result<()> {
    let payload = match cmd {
        "play-pause" | "next" | "previous" => json!({ "cmd": cmd }),
        "set-position" => {
            let Some(arg) = args.first() else {
                usage();
                std::process::exit(2);
            };
            let pos: f64 = arg
                .parse()
                .with_context(|| format!("invalid position {arg:?}"))?;
            json!({ "cmd": "set-position", "position": pos })
        }
        _ => unreachable!(),
    };
    if !send_over_socket(&payload.to_string())? {
        bail!("garakd rejected {cmd}");
    }
    Ok(())
}

fn run_status() -> Result<()> {
    let path = output().snapshot_path();
    let txt =
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    println!("{}", txt.trim());
    Ok(())
}

struct LabelFormat {
    format: Option<String>,
    truncate: Option<usize>,
    pango: bool,
}

impl LabelFormat {
    fn parse(mut args: Vec<String>) -> Self {
        let mut format = None;
        let mut truncate = None;
        let mut pango = false;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--format" if i + 1 < args.len() => {
                    format = Some(args.remove(i + 1));
                    args.remove(i);
                }
                "--truncate" if i + 1 < args.len() => {
                    truncate = args[i + 1].parse::<usize>().ok();
                    args.drain(i..=i + 1);
                }
                "--pango-escape" => {
                    pango = true;
                    args.remove(i);
                }
                _ => i += 1,
            }
        }
        Self {
            format,
            truncate,
            pango,
        }
    }

    fn shows_position(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.contains("{position}"))
    }

    fn render(&self, state: &Value) -> String {
        let field = |key: &str| state.get(key).and_then(Value::as_str).unwrap_or("");
        let time = |key: &str| fmt_time(state.get(key).and_then(Value::as_u64).unwrap_or(0));
        let (artist, title) = (field("artist"), field("title"));
        let sep = if !artist.is_empty() && !title.is_empty() {
            " - "
        } else {
            ""
        };
        let mut out = self.format.as_deref().map_or_else(
            || format!("{artist}{sep}{title}"),
            |f| {
                f.replace("{artist}", artist)
                    .replace("{title}", title)
                    .replace("{album}", field("album"))
                    .replace("{status}", field("status"))
                    .replace("{position}", &time("position"))
                    .replace("{length}", &time("length"))
                    .replace("{sep}", sep)
            },
        );
        if let Some(n) = self.truncate {
            if out.chars().count() > n {
                out = out.chars().take(n.saturating_sub(1)).collect::<String>() + "…";
            }
        }
        if self.pango {
            pango_escape(&out)
        } else {
            out
        }
    }
}

fn pango_escape(s: &str) -> String {
    // & first, the other entities contain it
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

fn print_line(line: &str) {
    println!("{line}");
    let _ = std::io::stdout().flush();
}

fn read_snapshot(output: &Output) -> Option<Value> {
    fs::read_to_string(output.snapshot_path())
        .ok()
        .and_then(|txt| serde_json::from_str::<Value>(&txt).ok())
}

fn run_watch(args: Vec<String>) -> ! {
    let label = LabelFormat::parse(args);
    let output = output();
    let mut last = String::new();
    let mut show = |state: &Value| {
        let out = label.render(state);
        if out != last {
            print_line(&out);
            last = out;
        }
    };

    if let Some(state) = read_snapshot(&output) {
        show(&state);
    }

    let path = output.events_path();
    let _ = OpenOptions::new().create(true).append(true).open(&path);
    loop {
        let Ok(file) = File::open(&path) else {
            thread::sleep(Duration::from_millis(300));
            continue;
        };
        let mut reader = BufReader::new(file);
        let _ = reader.get_mut().seek(SeekFrom::End(0));

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    // position ticks only land in the snapshot
                    if label.shows_position() {
                        if let Some(state) = read_snapshot(&output) {
                            show(&state);
                        }
                    }
                    thread::sleep(Duration::from_millis(250));
                }
                Ok(_) => {
                    if let Ok(state) = serde_json::from_str::<Value>(line.trim()) {
                        show(&state);
                    }
                }
            }
        }
    }
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        std::process::exit(2);
    }
    let cmd = args.remove(0);
    match cmd.as_str() {
        "play-pause" | "next" | "previous" | "set-position" => run_control(&cmd, &args),
        "status" => run_status(),
        "watch" => run_watch(args),
        _ => {
            usage();
            std::process::exit(2);
        }
    }
}
