// Synthetic Data Generator
// Deterministic (optionally seeded) fake values for `$faker.category.method`

use crate::error::InterpolationError;

use std::sync::Mutex;

use chrono::{Duration, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Dennis", "Edsger", "Frances", "Grace", "Ken", "Linus", "Margaret",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Turing", "Liskov", "Ritchie", "Dijkstra", "Allen", "Hopper", "Thompson",
    "Torvalds", "Hamilton",
];
const DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "test.dev"];
const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
    "kilo", "lima",
];
const CITIES: &[&str] = &["Lisbon", "Oslo", "Kyoto", "Austin", "Nairobi", "Montreal"];
const COUNTRIES: &[&str] = &["Portugal", "Norway", "Japan", "United States", "Kenya", "Canada"];
const COMPANY_SUFFIXES: &[&str] = &["Labs", "Systems", "Group", "Works", "Industries"];
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Fake data generator backed by a shared random source
///
/// With a seed, the sequence of generated values is reproducible for a run.
#[derive(Debug)]
pub struct FakeDataGenerator {
    rng: Mutex<StdRng>,
}

impl FakeDataGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Generate a value for `category.method`, with optional numeric arguments
    /// (`number.int(1, 10)`)
    pub fn generate(&self, path: &str) -> Result<Value, InterpolationError> {
        let (name, args) = parse_call(path);
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let rng = &mut *rng;

        let value = match name.to_lowercase().as_str() {
            "person.firstname" | "name.firstname" => Value::String(pick(rng, FIRST_NAMES)),
            "person.lastname" | "name.lastname" => Value::String(pick(rng, LAST_NAMES)),
            "person.fullname" | "name.fullname" => Value::String(format!(
                "{} {}",
                pick(rng, FIRST_NAMES),
                pick(rng, LAST_NAMES)
            )),
            "internet.email" => Value::String(format!(
                "{}.{}{}@{}",
                pick(rng, FIRST_NAMES).to_lowercase(),
                pick(rng, LAST_NAMES).to_lowercase(),
                rng.gen_range(1..1000),
                pick(rng, DOMAINS)
            )),
            "internet.username" | "internet.user_name" => Value::String(format!(
                "{}_{}",
                pick(rng, FIRST_NAMES).to_lowercase(),
                rng.gen_range(100..10000)
            )),
            "internet.url" => Value::String(format!(
                "https://{}.{}",
                pick(rng, WORDS),
                pick(rng, DOMAINS)
            )),
            "internet.password" => {
                let len = arg_or(&args, 0, 16.0).max(4.0) as usize;
                Value::String(alphanumeric(rng, len))
            }
            "string.uuid" | "datatype.uuid" => Value::String(uuid(rng)),
            "string.alphanumeric" | "random.alphanumeric" => {
                let len = arg_or(&args, 0, 10.0).max(1.0) as usize;
                Value::String(alphanumeric(rng, len))
            }
            "number.int" | "datatype.number" | "random.number" => {
                let min = arg_or(&args, 0, 0.0) as i64;
                let max = arg_or(&args, 1, if args.is_empty() { 99_999.0 } else { min as f64 + 100.0 })
                    as i64;
                if min > max {
                    return Err(InterpolationError::Strategy {
                        strategy: "faker".into(),
                        message: format!("invalid range {}..={}", min, max),
                    });
                }
                Value::from(rng.gen_range(min..=max))
            }
            "number.float" => {
                let min = arg_or(&args, 0, 0.0);
                let max = arg_or(&args, 1, 1.0);
                Value::from(rng.gen_range(min..max.max(min + f64::EPSILON)))
            }
            "datatype.boolean" | "random.boolean" => Value::Bool(rng.gen_bool(0.5)),
            "lorem.word" => Value::String(pick(rng, WORDS)),
            "lorem.words" => {
                let count = arg_or(&args, 0, 3.0).max(1.0) as usize;
                Value::String(words(rng, count))
            }
            "lorem.sentence" => {
                let count = rng.gen_range(4..9);
                let mut sentence = words(rng, count);
                if let Some(first) = sentence.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                sentence.push('.');
                Value::String(sentence)
            }
            "phone.number" => Value::String(format!(
                "+1-555-{:03}-{:04}",
                rng.gen_range(0..1000),
                rng.gen_range(0..10000)
            )),
            "location.city" | "address.city" => Value::String(pick(rng, CITIES)),
            "location.country" | "address.country" => Value::String(pick(rng, COUNTRIES)),
            "location.zipcode" | "address.zipcode" => {
                Value::String(format!("{:05}", rng.gen_range(0..100_000)))
            }
            "company.name" => Value::String(format!(
                "{} {}",
                pick(rng, LAST_NAMES),
                pick(rng, COMPANY_SUFFIXES)
            )),
            "date.past" | "date.recent" => {
                let days = if name.ends_with("recent") { 2 } else { 365 };
                let offset = rng.gen_range(1..=days * 86_400);
                Value::String(
                    (Utc::now() - Duration::seconds(offset))
                        .to_rfc3339_opts(SecondsFormat::Secs, true),
                )
            }
            "date.future" => {
                let offset = rng.gen_range(1..=365 * 86_400);
                Value::String(
                    (Utc::now() + Duration::seconds(offset))
                        .to_rfc3339_opts(SecondsFormat::Secs, true),
                )
            }
            _ => return Err(InterpolationError::UnknownGenerator(name.to_string())),
        };

        Ok(value)
    }
}

/// Split `number.int(1, 10)` into the method path and its numeric arguments
fn parse_call(path: &str) -> (&str, Vec<f64>) {
    let path = path.trim();
    match path.split_once('(') {
        Some((name, rest)) => {
            let args = rest
                .trim_end_matches(')')
                .split(',')
                .filter_map(|arg| arg.trim().parse().ok())
                .collect();
            (name.trim(), args)
        }
        None => (path, Vec::new()),
    }
}

fn arg_or(args: &[f64], index: usize, default: f64) -> f64 {
    args.get(index).copied().unwrap_or(default)
}

fn pick(rng: &mut StdRng, items: &[&str]) -> String {
    items.choose(rng).copied().unwrap_or_default().to_string()
}

fn words(rng: &mut StdRng, count: usize) -> String {
    (0..count)
        .map(|_| pick(rng, WORDS))
        .collect::<Vec<_>>()
        .join(" ")
}

fn alphanumeric(rng: &mut StdRng, len: usize) -> String {
    (0..len)
        .map(|_| ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}

/// Version 4 UUID drawn from the generator's own random source
fn uuid(rng: &mut StdRng) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = FakeDataGenerator::new(Some(42));
        let b = FakeDataGenerator::new(Some(42));
        for path in ["person.fullName", "internet.email", "string.uuid", "number.int(1, 6)"] {
            assert_eq!(a.generate(path).unwrap(), b.generate(path).unwrap());
        }
    }

    #[test]
    fn test_generated_shapes() {
        let faker = FakeDataGenerator::new(Some(7));
        let email = faker.generate("internet.email").unwrap();
        assert!(email.as_str().unwrap().contains('@'));

        let uuid = faker.generate("string.uuid").unwrap();
        assert_eq!(uuid.as_str().unwrap().len(), 36);
        assert_eq!(uuid.as_str().unwrap().chars().nth(14), Some('4'));

        let n = faker.generate("number.int(5, 5)").unwrap();
        assert_eq!(n, Value::from(5));

        let code = faker.generate("string.alphanumeric(8)").unwrap();
        assert_eq!(code.as_str().unwrap().len(), 8);

        let sentence = faker.generate("lorem.sentence").unwrap();
        assert!(sentence.as_str().unwrap().ends_with('.'));
    }

    #[test]
    fn test_unknown_generator() {
        let faker = FakeDataGenerator::new(None);
        assert!(matches!(
            faker.generate("vehicle.model"),
            Err(InterpolationError::UnknownGenerator(_))
        ));
        assert!(faker.generate("number.int(10, 1)").is_err());
    }
}
