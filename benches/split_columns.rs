//! Column splitting and full report assembly over a typical description.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use zodiac_server::columns::{parse_house_table, parse_planet_line, split_columns};
use zodiac_server::engine::ChartDescription;
use zodiac_server::report::{assemble_report, AuxiliaryFragment, ReportParams};

const PLANETS: [&str; 10] = [
    "Sun         23          Leo         15          VII",
    "Moon     4     Aries     2     III",
    "Mercury   11   Virgo   40   VIII",
    "Venus    29    Cancer   3    VI",
    "Mars   12   Virgo   30   Pole",
    "Jupiter         1          Aries         59          II",
    "Saturn   17   Cancer   8   VI",
    "Uranus  28  Libra  44  IX",
    "Neptune   9   Sagittarius   21   X",
    "Pluto   6   Libra   12   IX",
];

fn description() -> ChartDescription {
    let mut houses = vec!["Houses (Placidus):".to_owned()];
    for (index, sign) in ["Virgo", "Libra", "Scorpio", "Sagittarius", "Capricorn", "Aquarius"]
        .iter()
        .cycle()
        .take(12)
        .enumerate()
    {
        houses.push(format!("{:<6}  {}   {}   {}", index + 1, index * 2, sign, index * 4));
    }
    ChartDescription {
        planets: PLANETS.iter().map(|line| (*line).to_owned()).collect(),
        houses: houses.join("\n"),
        aspects: vec![
            "Opposition Sun-Moon".to_owned(),
            "Sextile Moon-Mars".to_owned(),
            "Trine Sun-Mars".to_owned(),
            "Conjunction Venus-Saturn".to_owned(),
        ],
    }
}

fn params() -> ReportParams {
    let text = |value: &str| value.to_owned();
    ReportParams {
        ms: text("15321321"),
        n: text("natal"),
        a: text("1975"),
        m: text("6"),
        d: text("20"),
        h: text("22"),
        min: text("00"),
        gmt: text("-3"),
        lat: text("-35.484462"),
        lon: text("-69.5797495"),
        ciudad: text("Malargue Mendoza"),
    }
}

fn bench_split_columns(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_columns");

    group.bench_function("planet_lines", |b| {
        b.iter(|| {
            for line in PLANETS {
                black_box(split_columns(black_box(line)));
            }
        });
    });

    group.bench_function("planet_entries", |b| {
        b.iter(|| {
            for line in PLANETS {
                black_box(parse_planet_line(black_box(line)).expect("planet line"));
            }
        });
    });

    let description = description();
    group.bench_function("house_table", |b| {
        b.iter(|| black_box(parse_house_table(black_box(&description.houses)).expect("houses")));
    });

    group.bench_function("assemble_report", |b| {
        b.iter(|| {
            black_box(
                assemble_report(params(), black_box(&description), AuxiliaryFragment::Empty)
                    .expect("report"),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_split_columns);
criterion_main!(benches);
