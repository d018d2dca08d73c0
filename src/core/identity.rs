use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

/// Length of the abbreviated identifier used in logs and fallback names.
pub const SHORT_ID_LEN: usize = 12;

const MAX_NAME_ATTEMPTS: u32 = 8;

const ADJECTIVES: &[&str] = &[
    "admiring", "amazing", "awesome", "blissful", "bold", "brave", "busy", "charming",
    "clever", "cool", "compassionate", "competent", "confident", "dazzling", "determined",
    "eager", "ecstatic", "elastic", "elegant", "epic", "focused", "friendly", "gallant",
    "gifted", "goofy", "gracious", "happy", "hopeful", "infallible", "inspiring", "jolly",
    "keen", "kind", "laughing", "loving", "lucid", "modest", "musing", "nifty", "nostalgic",
    "objective", "optimistic", "peaceful", "pensive", "practical", "priceless", "quirky",
    "relaxed", "reverent", "romantic", "serene", "sharp", "silly", "stoic", "suspicious",
    "tender", "thirsty", "trusting", "upbeat", "vibrant", "vigilant", "wizardly", "wonderful",
    "youthful", "zealous", "zen",
];

const SURNAMES: &[&str] = &[
    "albattani", "allen", "almeida", "archimedes", "ardinghelli", "babbage", "banach",
    "bardeen", "bartik", "bell", "blackwell", "bohr", "brattain", "brown", "carson",
    "chandrasekhar", "curie", "darwin", "davinci", "dijkstra", "einstein", "elion",
    "engelbart", "euclid", "euler", "fermat", "fermi", "feynman", "franklin", "galileo",
    "goldstine", "goodall", "hamilton", "hawking", "heisenberg", "hodgkin", "hopper",
    "hypatia", "jang", "jennings", "joliot", "kalam", "keller", "kepler", "khorana",
    "kilby", "kirch", "knuth", "lalande", "lamarr", "leakey", "leavitt", "lovelace",
    "lumiere", "mayer", "mccarthy", "mcclintock", "meitner", "mestorf", "mirzakhani",
    "morse", "newton", "nobel", "noether", "pare", "pasteur", "perlman", "pike",
    "poincare", "ptolemy", "raman", "ramanujan", "ritchie", "roentgen", "rosalind",
    "saha", "sammet", "shannon", "shirley", "sinoussi", "stallman", "swanson", "swartz",
    "tesla", "thompson", "torvalds", "turing", "varahamihira", "visvesvaraya", "wescoff",
    "williams", "wilson", "wing", "wozniak", "wright", "yalow", "yonath",
];

/// Generates a fresh container identifier: 32 random bytes, hex encoded.
///
/// Identifiers that would parse as a plain number are regenerated so the
/// short form can never be mistaken for an index.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 32];
    loop {
        rng.fill_bytes(&mut bytes);
        let id: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        if id[..SHORT_ID_LEN].parse::<u64>().is_err() {
            return id;
        }
    }
}

pub fn short_id(id: &str) -> &str {
    if id.len() > SHORT_ID_LEN {
        &id[..SHORT_ID_LEN]
    } else {
        id
    }
}

/// Picks an `adjective_surname` name; a non-zero `retry` appends a digit.
pub fn random_name(retry: u32) -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let surname = SURNAMES.choose(&mut rng).copied().unwrap_or("container");
    let name = format!("{}_{}", adjective, surname);
    if retry > 0 {
        format!("{}{}", name, rng.gen_range(0..10))
    } else {
        name
    }
}

/// Returns the requested name, or a random one the caller does not report
/// as taken.
///
/// Never fails: once the random corpus keeps colliding the name falls back
/// to one derived from a fresh identifier.
pub fn resolve_name<F>(requested: Option<&str>, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if let Some(name) = requested.filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    (0..MAX_NAME_ATTEMPTS)
        .map(random_name)
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| format!("container_{}", short_id(&generate_id())))
}
