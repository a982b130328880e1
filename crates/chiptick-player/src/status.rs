use chiptick_core::Machine;

const NOTE_NAMES: [&str; 12] = [
    "A-", "A#", "B-", "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#",
];

/// Tracker-style name for a semitone index where 48 is A-4 (440 Hz).
pub fn note_name(note: u8) -> String {
    let n = note as usize;
    format!("{}{}", NOTE_NAMES[n % 12], (n + 9) / 12)
}

fn level_char(level: u8) -> char {
    char::from_digit(level.min(15) as u32, 16)
        .unwrap_or('?')
        .to_ascii_uppercase()
}

/// One-line summary of the playback state: track, per-channel note and
/// left/right level, mute flags, speed and volume.
pub fn status_line(machine: &Machine) -> String {
    let notes = machine.notes();
    let levels = machine.levels();

    let channels = (0..4)
        .map(|ch| {
            if machine.is_muted(ch) {
                return format!("{} ---  ", ch + 1);
            }
            let note = notes[ch].map_or_else(|| "...".to_string(), note_name);
            format!(
                "{} {note} {}{}",
                ch + 1,
                level_char(levels[ch * 2]),
                level_char(levels[ch * 2 + 1])
            )
        })
        .collect::<Vec<_>>()
        .join(" | ");

    let paused = if machine.is_paused() { " [paused]" } else { "" };
    format!(
        "track {} (0-{}) | {channels} | speed {:3.0}% vol {:3.0}%{paused}",
        machine.track(),
        machine.track_count().saturating_sub(1),
        machine.speed() * 100.0,
        machine.volume() * 100.0,
    )
}
