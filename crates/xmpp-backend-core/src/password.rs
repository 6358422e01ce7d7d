use rand::seq::SliceRandom;

/// ASCII letters and digits.
pub const DEFAULT_PASSWORD_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const DEFAULT_PASSWORD_LENGTH: usize = 32;

/// Draw `length` characters uniformly from `chars`.
///
/// Not meant as a secret generator, only as an unguessable placeholder for blocked
/// accounts and reservations. An empty alphabet yields an empty string.
pub fn random_password(length: usize, chars: &str) -> String {
    let alphabet: Vec<char> = chars.chars().collect();
    let mut rng = rand::thread_rng();
    (0..length)
        .filter_map(|_| alphabet.choose(&mut rng))
        .collect()
}
