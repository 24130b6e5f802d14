//! Mangling tests: the fixed character table plus a randomized injectivity
//! property over the full special-character alphabet.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use yantra::mangle::munge;

#[test]
fn reserved_words_and_table_spellings() {
    assert_eq!(munge("class"), "$class_");
    assert_eq!(munge("with"), "$with_");
    assert_eq!(munge("Function"), "$Function_");
    assert_eq!(munge("-invoke"), "$_invoke");
    assert_eq!(munge("-invoke-more"), "$_invoke_more");
    assert_eq!(munge("empty?"), "empty$QMARK_");
    assert_eq!(munge("swap!"), "swap$BANG_");
    assert_eq!(munge("->vec"), "$_$GT_vec");
    assert_eq!(munge("<=>"), "$LT_$EQ_$GT_");
    assert_eq!(munge("kebab-case-name"), "kebab_case_name");
    assert_eq!(munge("snake_case"), "snake$UNDERSCORE_case");
    assert_eq!(munge("a$b"), "a$DOLLAR_b");
    assert_eq!(munge("ns/name"), "ns$SLASH_name");
    assert_eq!(munge("{}[]"), "$LBRACE_$RBRACE_$LBRACK_$RBRACK_");
    assert_eq!(munge("x__7"), "x$7_");
    assert_eq!(munge("__auto__"), "$AUTO_");
}

#[test]
fn hex_fallback_covers_everything_else() {
    assert_eq!(munge("a.b"), "a$u2e_b");
    assert_eq!(munge("λ"), "$u3bb_");
    assert_eq!(munge("a b"), "a$u20_b");
}

#[test]
fn mangling_is_injective_over_random_symbols() {
    const ALPHABET: &[char] = &[
        'a', 'b', 'c', 'x', 'y', 'z', 'A', 'Q', 'Z', '0', '5', '9', '-', '_', '$', ':', '+', '>',
        '<', '=', '~', '!', '@', '#', '\'', '"', '%', '^', '&', '*', '|', '{', '}', '[', ']', '/',
        '\\', '?', '.', ' ', 'π',
    ];
    let mut rng = Xoshiro256StarStar::seed_from_u64(0x59414e5452410001);
    let mut seen: HashMap<String, String> = HashMap::new();

    for _ in 0..30_000 {
        let len = rng.gen_range(1..=10);
        let mut name = String::new();
        for i in 0..len {
            let mut c = ALPHABET[rng.gen_range(0..ALPHABET.len())];
            // Symbols never start with a digit.
            while i == 0 && c.is_ascii_digit() {
                c = ALPHABET[rng.gen_range(0..ALPHABET.len())];
            }
            name.push(c);
        }

        let mangled = munge(&name);
        if let Some(existing) = seen.get(&mangled) {
            assert_eq!(
                existing, &name,
                "collision: '{existing}' and '{name}' both mangle to '{mangled}'"
            );
        } else {
            seen.insert(mangled, name);
        }
    }
}
