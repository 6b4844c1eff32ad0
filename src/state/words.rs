/// Built-in word pool used when a game is created without its own list
pub const DEFAULT_WORDS: &[&str] = &[
    "AFRICA", "AGENT", "AIR", "ALIEN", "AMAZON", "ANGEL", "ANTARCTICA", "APPLE", "ARM", "BACK",
    "BAND", "BANK", "BARK", "BEACH", "BELT", "BERLIN", "BERRY", "BOARD", "BOND", "BOOM", "BOW",
    "BOX", "BUG", "CANADA", "CAPITAL", "CELL", "CENTER", "CHINA", "CHOCOLATE", "CIRCLE", "CLUB",
    "COMPOUND", "COPPER", "CRASH", "CRICKET", "CROSS", "DEATH", "DICE", "DINOSAUR", "DOCTOR",
    "DOG", "DRESS", "DWARF", "EAGLE", "ENGINE", "FAIR", "FALL", "FIELD", "FILE", "FLUTE", "FLY",
    "FORCE", "FOREST", "GAS", "GHOST", "GIANT", "GLASS", "GLOVE", "GOLD", "GRACE", "HAND",
    "HOOK", "HORN", "HORSE", "HOSPITAL", "ICE", "IRON", "JET", "KEY", "KING", "KNIFE", "LAB",
    "LEMON", "LIGHT", "LINE", "LOCK", "MAIL", "MARCH", "MERCURY", "MOON", "MOUNT", "NET",
    "NIGHT", "NOTE", "NURSE", "OCEAN", "OLIVE", "OPERA", "ORANGE", "PAN", "PAPER", "PARK",
    "PILOT", "PIRATE", "PITCH", "PLANE", "POLE", "PORT", "PRESS", "QUEEN", "RABBIT", "RING",
    "ROBOT", "ROCK", "ROUND", "SATURN", "SCHOOL", "SCREEN", "SHIP", "SHOT", "SNOW", "SPACE",
    "SPIDER", "SPRING", "SQUARE", "STAR", "STREAM", "TABLE", "TIME", "TOWER", "TRAIN", "TUBE",
    "VAN", "WAVE", "WHALE", "WIND", "WITCH", "YARD",
];

pub fn default_words() -> Vec<String> {
    DEFAULT_WORDS.iter().map(|w| w.to_string()).collect()
}
