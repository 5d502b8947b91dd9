/// Installs a panic hook that routes panic messages through tracing before
/// delegating to the previous hook, so panics in spawned tasks show up in the
/// structured log stream.
pub fn install() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("thread panicked: {info}");
        previous(info);
    }));
}
