use linktory_commons::start_everything;

fn main() {
    start_everything("WARN,linktory_bot=debug", linktory_bot::entry());
}
