//! Synthetic sandbox documents for the stylesheet and script modes.

use super::Generation;

const STYLESHEET_HEAD: &str = "<!doctype html><html><head><style>";
const STYLESHEET_TAIL: &str = "</style></head><body><h3>CSS preview</h3></body></html>";

/// Installed before the user program. Redirects console output and window
/// level failures to the parent as `log` messages tagged with the run.
const BRIDGE: &str = r"(function () {
  const generation = __GENERATION__;
  const post = (level, args) => {
    parent.postMessage({
      type: 'log',
      level: level,
      text: args.map((arg) => String(arg)).join(' '),
      generation: generation,
    }, '*');
  };
  console.log = (...args) => post('info', args);
  console.info = console.log;
  console.debug = console.log;
  console.warn = console.log;
  console.error = (...args) => post('error', args);
  window.addEventListener('error', (event) => post('error', [event.message]));
  window.addEventListener('unhandledrejection', (event) => post('error', [event.reason]));
})();
";

const PROGRAM_HEAD: &str = "(function () {\n  try {\n";
const PROGRAM_TAIL: &str = "\n  } catch (e) {\n    console.error(e);\n  }\n})();\n";

pub fn stylesheet(css: &str) -> String {
    let css = neutralize_closing_tag(css, "style");
    let mut out = String::with_capacity(STYLESHEET_HEAD.len() + css.len() + STYLESHEET_TAIL.len());
    out.push_str(STYLESHEET_HEAD);
    out.push_str(&css);
    out.push_str(STYLESHEET_TAIL);
    out
}

pub fn bridge(generation: Generation) -> String {
    BRIDGE.replace("__GENERATION__", &generation.get().to_string())
}

pub fn program(js: &str) -> String {
    let js = neutralize_closing_tag(js, "script");
    let mut out = String::with_capacity(PROGRAM_HEAD.len() + js.len() + PROGRAM_TAIL.len());
    out.push_str(PROGRAM_HEAD);
    out.push_str(&js);
    out.push_str(PROGRAM_TAIL);
    out
}

pub fn script_document(bridge: &str, program: &str) -> String {
    format!("<!doctype html><html><body><script>\n{bridge}</script><script>\n{program}</script></body></html>")
}

/// Rewrite every `</tag` (ASCII case-insensitive) as `<\/tag` so embedded
/// source cannot terminate its enclosing raw-text element.
pub fn neutralize_closing_tag(source: &str, tag: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(idx) = rest.find("</") {
        let after = &rest[idx + 2..];
        let closes = after
            .get(..tag.len())
            .is_some_and(|name| name.eq_ignore_ascii_case(tag));
        out.push_str(&rest[..idx]);
        out.push_str(if closes { "<\\/" } else { "</" });
        rest = after;
    }
    out.push_str(rest);
    out
}
