use std::panic;

/// Routes panics through `tracing` before the default hook prints them.
pub fn init() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(%location, "{info}");

        default_hook(info);
    }));
}
