//! Bookworm entity declarations.

use crate::model::schema::{AttributeDef, EntitySchema};

/// Genres offered by the add-book form.
pub const GENRES: &[&str] = &[
    "Fantasy", "Horror", "Kids", "Mystery", "Poetry", "Romance", "Thriller",
];

/// Highest star rating; `0` means unrated.
pub const MAX_RATING: i64 = 5;

/// A book with its reader's review.
pub static BOOK: EntitySchema = EntitySchema {
    name: "Book",
    attributes: &[
        AttributeDef::text("title").required().fallback("Unknown Book"),
        AttributeDef::text("author")
            .required()
            .fallback("Unknown author"),
        AttributeDef::text("genre").one_of(GENRES).fallback("Mystery"),
        AttributeDef::text("review").fallback("No review"),
        AttributeDef::integer("rating").range(0, MAX_RATING),
        AttributeDef::date("date"),
    ],
};

/// A student roster entry.
pub static STUDENT: EntitySchema = EntitySchema {
    name: "Student",
    attributes: &[AttributeDef::text("name").required().fallback("Unknown")],
};
