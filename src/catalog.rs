use crate::model::{Movie, MovieId};

pub static CATALOG: &[Movie] = &[
    Movie {
        id: 1,
        title: "Dark City",
        category: "Sci-Fi",
        year: 2020,
        description: "A man wakes in a city where the sun never rises and memories are rewritten every night.",
    },
    Movie {
        id: 2,
        title: "The Signal",
        category: "Thriller",
        year: 2019,
        description: "Three students chase a hacker across the desert and lose track of what is real.",
    },
    Movie {
        id: 3,
        title: "Lost Horizon",
        category: "Adventure",
        year: 2021,
        description: "Survivors of a mountain crash stumble into a hidden valley that time forgot.",
    },
    Movie {
        id: 4,
        title: "Echoes",
        category: "Drama",
        year: 2018,
        description: "A pianist returns to her hometown and confronts the silence she left behind.",
    },
    Movie {
        id: 5,
        title: "Nebula",
        category: "Sci-Fi",
        year: 2022,
        description: "A salvage crew drifts into a nebula that answers back.",
    },
    Movie {
        id: 6,
        title: "Afterlight",
        category: "Drama",
        year: 2020,
        description: "Two strangers share the last hours of a blackout in a flooded city.",
    },
    Movie {
        id: 7,
        title: "Mirage",
        category: "Thriller",
        year: 2017,
        description: "A desert rescue turns into a hunt when the missing hiker does not want to be found.",
    },
    Movie {
        id: 8,
        title: "Pulse",
        category: "Action",
        year: 2023,
        description: "A courier with a failing heart implant has one night to outrun the people who built it.",
    },
    Movie {
        id: 9,
        title: "Voyager",
        category: "Adventure",
        year: 2016,
        description: "A retired sailor attempts one final crossing of the open ocean alone.",
    },
    Movie {
        id: 10,
        title: "Signal Lost",
        category: "Sci-Fi",
        year: 2021,
        description: "Mission control loses contact with a crew that keeps sending messages from the future.",
    },
];

pub fn find(id: MovieId) -> Option<&'static Movie> {
    CATALOG.iter().find(|movie| movie.id == id)
}

pub fn contains(id: MovieId) -> bool {
    find(id).is_some()
}

/// Catalog rows grouped by category, in order of first appearance.
pub fn by_category() -> Vec<(&'static str, Vec<&'static Movie>)> {
    let mut rows: Vec<(&'static str, Vec<&'static Movie>)> = Vec::new();
    for movie in CATALOG {
        match rows.iter_mut().find(|(category, _)| *category == movie.category) {
            Some((_, movies)) => movies.push(movie),
            None => rows.push((movie.category, vec![movie])),
        }
    }
    rows
}
