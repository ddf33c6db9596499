use bookworm_core::{
    AttributeDef, AttributeValue, Context, ContextError, EntitySchema, Predicate, RecordId,
    Schema, SortKey, SqliteRecordStore, ViewChange, ViewDefinition, ViewHandle, BOOK, STUDENT,
};
use proptest::prelude::*;
use std::sync::Arc;

static SHELF_LABEL: EntitySchema = EntitySchema {
    name: "ShelfLabel",
    attributes: &[
        AttributeDef::text("label").case_insensitive(),
        AttributeDef::integer("shelf"),
    ],
};

fn open_context() -> Context<SqliteRecordStore> {
    let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    Context::open(store, Schema::bookworm()).unwrap()
}

fn add_book(context: &mut Context<SqliteRecordStore>, title: &str, author: &str) -> RecordId {
    let id = context.create(&BOOK).unwrap();
    context.mutate(id, "title", AttributeValue::text(title)).unwrap();
    context.mutate(id, "author", AttributeValue::text(author)).unwrap();
    id
}

fn shelf_definition() -> ViewDefinition {
    ViewDefinition::new(&BOOK)
        .sort_by(SortKey::ascending("title"))
        .sort_by(SortKey::ascending("author"))
}

fn titles(context: &Context<SqliteRecordStore>, view: &ViewHandle) -> Vec<String> {
    context
        .view_records(view)
        .iter()
        .map(|book| book.display("title"))
        .collect()
}

#[test]
fn equal_titles_order_by_author() {
    let mut context = open_context();
    let shelf = context.define_view(&shelf_definition()).unwrap();

    let hamill = add_book(&mut context, "Forever", "Pete Hamill");
    let blume = add_book(&mut context, "Forever", "Judy Blume");

    assert_eq!(shelf.ids(), vec![blume, hamill]);
}

#[test]
fn full_ties_keep_insertion_order() {
    let mut context = open_context();
    let first = add_book(&mut context, "Dune", "Frank Herbert");
    let second = add_book(&mut context, "Dune", "Frank Herbert");
    let shelf = context.define_view(&shelf_definition()).unwrap();
    let third = add_book(&mut context, "Dune", "Frank Herbert");

    assert_eq!(shelf.ids(), vec![first, second, third]);
}

#[test]
fn empty_titles_sort_first_ascending_and_last_descending() {
    let mut context = open_context();
    let untitled = context.create(&BOOK).unwrap();
    let named = add_book(&mut context, "Beloved", "Toni Morrison");

    let ascending = context
        .define_view(&ViewDefinition::new(&BOOK).sort_by(SortKey::ascending("title")))
        .unwrap();
    let descending = context
        .define_view(&ViewDefinition::new(&BOOK).sort_by(SortKey::descending("title")))
        .unwrap();

    assert_eq!(ascending.ids(), vec![untitled, named]);
    assert_eq!(descending.ids(), vec![named, untitled]);
    assert_eq!(titles(&context, &ascending), vec!["Unknown Book", "Beloved"]);
}

#[test]
fn mutation_moves_record_to_new_position() {
    let mut context = open_context();
    let shelf = context.define_view(&shelf_definition()).unwrap();
    let a = add_book(&mut context, "Alpha", "X");
    let b = add_book(&mut context, "Beta", "X");
    let c = add_book(&mut context, "Gamma", "X");

    context.mutate(a, "title", AttributeValue::text("Zeta")).unwrap();

    assert_eq!(shelf.ids(), vec![b, c, a]);
    assert_eq!(shelf.position(a), Some(2));
}

#[test]
fn filter_membership_follows_mutations() {
    let mut context = open_context();
    let kids = context
        .define_view(
            &ViewDefinition::new(&BOOK)
                .filter(Predicate::equals("genre", AttributeValue::text("Kids")))
                .sort_by(SortKey::ascending("title")),
        )
        .unwrap();
    let id = add_book(&mut context, "Matilda", "Roald Dahl");
    assert!(kids.is_empty());

    context.mutate(id, "genre", AttributeValue::text("Kids")).unwrap();
    assert!(kids.contains(id));

    context.mutate(id, "genre", AttributeValue::text("Fantasy")).unwrap();
    assert!(!kids.contains(id));
}

#[test]
fn contains_filter_ignores_case() {
    let mut context = open_context();
    let search = context
        .define_view(&ViewDefinition::new(&BOOK).filter(Predicate::contains("author", "le guin")))
        .unwrap();
    let id = add_book(&mut context, "The Dispossessed", "Ursula K. Le Guin");
    add_book(&mut context, "Kindred", "Octavia Butler");

    assert_eq!(search.ids(), vec![id]);
}

#[test]
fn delete_removes_from_views_before_save() {
    let mut context = open_context();
    let shelf = context.define_view(&shelf_definition()).unwrap();
    let kept = add_book(&mut context, "Kept", "A");
    let doomed = add_book(&mut context, "Doomed", "B");
    context.save().unwrap();

    context.delete(doomed).unwrap();
    assert_eq!(shelf.ids(), vec![kept]);
    assert!(context.get(doomed).is_none());

    context.save().unwrap();
    assert!(context
        .snapshot()
        .iter()
        .all(|(id, _)| *id != doomed));
}

#[test]
fn views_of_other_entities_are_untouched() {
    let mut context = open_context();
    let students = context
        .define_view(&ViewDefinition::new(&STUDENT))
        .unwrap();
    let events = students.subscribe();
    add_book(&mut context, "Holes", "Louis Sachar");

    assert!(students.is_empty());
    assert!(events.try_recv().is_err());
}

#[test]
fn subscribers_receive_each_change() {
    let mut context = open_context();
    let shelf = context.define_view(&shelf_definition()).unwrap();
    let events = shelf.subscribe();

    let id = context.create(&BOOK).unwrap();
    context.mutate(id, "title", AttributeValue::text("Emma")).unwrap();
    context.mutate(id, "author", AttributeValue::text("Jane Austen")).unwrap();
    context.save().unwrap();
    context.delete(id).unwrap();

    let changes: Vec<ViewChange> = events.try_iter().map(|event| event.cause).collect();
    assert_eq!(
        changes,
        vec![
            ViewChange::Inserted(id),
            ViewChange::Updated(id),
            ViewChange::Updated(id),
            ViewChange::Committed,
            ViewChange::Removed(id),
        ]
    );
}

#[test]
fn discard_resets_views_to_saved_state() {
    let mut context = open_context();
    let saved = add_book(&mut context, "Saved", "A");
    context.save().unwrap();
    let shelf = context.define_view(&shelf_definition()).unwrap();
    let events = shelf.subscribe();

    context.mutate(saved, "title", AttributeValue::text("Renamed")).unwrap();
    add_book(&mut context, "Draft", "B");
    assert_eq!(context.discard_changes().unwrap(), 2);

    assert_eq!(shelf.ids(), vec![saved]);
    assert_eq!(titles(&context, &shelf), vec!["Saved"]);
    let last = events.try_iter().last().unwrap();
    assert_eq!(last.cause, ViewChange::Reset);
    assert_eq!(last.ids, vec![saved]);
}

#[test]
fn released_views_are_pruned() {
    let mut context = open_context();
    let kept = context.define_view(&shelf_definition()).unwrap();
    let released = context.define_view(&shelf_definition()).unwrap();
    assert_eq!(context.live_views(), 2);

    drop(released);
    add_book(&mut context, "Nudge", "A");
    assert_eq!(context.live_views(), 1);
    assert_eq!(kept.len(), 1);
}

#[test]
fn unknown_sort_attribute_is_rejected() {
    let mut context = open_context();
    let err = context
        .define_view(&ViewDefinition::new(&BOOK).sort_by(SortKey::ascending("isbn")))
        .unwrap_err();
    assert!(matches!(err, ContextError::InvalidAttribute(_)));
}

#[test]
fn case_insensitive_ties_keep_insertion_order() {
    let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    let mut context = Context::open(store, Schema::new(vec![&SHELF_LABEL])).unwrap();
    let labels = context
        .define_view(&ViewDefinition::new(&SHELF_LABEL).sort_by(SortKey::ascending("label")))
        .unwrap();

    let mut add = |label: &str| {
        let id = context.create(&SHELF_LABEL).unwrap();
        context.mutate(id, "label", AttributeValue::text(label)).unwrap();
        id
    };
    let lower = add("forever");
    let title = add("Beloved");
    let upper = add("FOREVER");
    let plain = add("beloved");

    assert_eq!(labels.ids(), vec![title, plain, lower, upper]);
}

#[derive(Debug, Clone)]
enum Op {
    Create { title: usize, author: usize },
    SetTitle { target: usize, title: usize },
    SetRating { target: usize, rating: i64 },
    SetGenre { target: usize, kids: bool },
    CreateLabel { label: usize, shelf: i64 },
    SetLabel { target: usize, label: usize },
    Delete { target: usize },
    Save,
    Discard,
}

const TITLES: &[&str] = &["", "Forever", "forever", "Beloved", "Dune", "  "];
const AUTHORS: &[&str] = &["", "Judy Blume", "Pete Hamill", "Toni Morrison"];
const LABELS: &[&str] = &[
    "", "Forever", "forever", "FOREVER", "beloved", "Beloved", "Émile", "émile",
];

fn property_context() -> Context<SqliteRecordStore> {
    let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    Context::open(store, Schema::new(vec![&BOOK, &SHELF_LABEL])).unwrap()
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..TITLES.len(), 0..AUTHORS.len())
            .prop_map(|(title, author)| Op::Create { title, author }),
        3 => (any::<usize>(), 0..TITLES.len())
            .prop_map(|(target, title)| Op::SetTitle { target, title }),
        2 => (any::<usize>(), 0..=5i64)
            .prop_map(|(target, rating)| Op::SetRating { target, rating }),
        2 => (any::<usize>(), any::<bool>())
            .prop_map(|(target, kids)| Op::SetGenre { target, kids }),
        3 => (0..LABELS.len(), 0..3i64)
            .prop_map(|(label, shelf)| Op::CreateLabel { label, shelf }),
        3 => (any::<usize>(), 0..LABELS.len())
            .prop_map(|(target, label)| Op::SetLabel { target, label }),
        2 => any::<usize>().prop_map(|target| Op::Delete { target }),
        1 => Just(Op::Save),
        1 => Just(Op::Discard),
    ]
}

fn definitions() -> Vec<ViewDefinition> {
    vec![
        shelf_definition(),
        ViewDefinition::new(&BOOK)
            .sort_by(SortKey::descending("rating"))
            .sort_by(SortKey::ascending("title")),
        ViewDefinition::new(&BOOK)
            .filter(Predicate::Any(vec![
                Predicate::equals("genre", AttributeValue::text("Kids")),
                Predicate::contains("title", "FOR"),
            ]))
            .sort_by(SortKey::descending("author")),
        ViewDefinition::new(&BOOK).filter(Predicate::Not(Box::new(Predicate::IsEmpty(
            "author".to_string(),
        )))),
        ViewDefinition::new(&SHELF_LABEL).sort_by(SortKey::ascending("label")),
        ViewDefinition::new(&SHELF_LABEL)
            .sort_by(SortKey::descending("label"))
            .sort_by(SortKey::ascending("shelf")),
        ViewDefinition::new(&SHELF_LABEL)
            .filter(Predicate::contains("label", "for"))
            .sort_by(SortKey::descending("shelf"))
            .sort_by(SortKey::ascending("label")),
    ]
}

fn pick(created: &[RecordId], target: usize) -> Option<RecordId> {
    (!created.is_empty()).then(|| created[target % created.len()])
}

fn apply(context: &mut Context<SqliteRecordStore>, created: &mut Vec<RecordId>, op: &Op) {
    match *op {
        Op::Create { title, author } => {
            let id = context.create(&BOOK).unwrap();
            let _ = context.mutate(id, "title", AttributeValue::text(TITLES[title]));
            let _ = context.mutate(id, "author", AttributeValue::text(AUTHORS[author]));
            created.push(id);
        }
        Op::SetTitle { target, title } => {
            if let Some(id) = pick(created, target) {
                let _ = context.mutate(id, "title", AttributeValue::text(TITLES[title]));
            }
        }
        Op::SetRating { target, rating } => {
            if let Some(id) = pick(created, target) {
                let _ = context.mutate(id, "rating", AttributeValue::Integer(rating));
            }
        }
        Op::SetGenre { target, kids } => {
            if let Some(id) = pick(created, target) {
                let genre = if kids { "Kids" } else { "Horror" };
                let _ = context.mutate(id, "genre", AttributeValue::text(genre));
            }
        }
        Op::CreateLabel { label, shelf } => {
            let id = context.create(&SHELF_LABEL).unwrap();
            let _ = context.mutate(id, "label", AttributeValue::text(LABELS[label]));
            let _ = context.mutate(id, "shelf", AttributeValue::Integer(shelf));
            created.push(id);
        }
        Op::SetLabel { target, label } => {
            if let Some(id) = pick(created, target) {
                let _ = context.mutate(id, "label", AttributeValue::text(LABELS[label]));
            }
        }
        Op::Delete { target } => {
            if let Some(id) = pick(created, target) {
                let _ = context.delete(id);
            }
        }
        Op::Save => {
            let _ = context.save();
        }
        Op::Discard => {
            context.discard_changes().unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn incremental_views_match_fresh_views(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut context = property_context();
        let live: Vec<ViewHandle> = definitions()
            .iter()
            .map(|definition| context.define_view(definition).unwrap())
            .collect();
        let mut created = Vec::new();

        for op in &ops {
            apply(&mut context, &mut created, op);
            for (definition, view) in definitions().iter().zip(&live) {
                let fresh = context.define_view(definition).unwrap();
                prop_assert_eq!(view.ids(), fresh.ids(), "after {:?}", op);
            }
        }
    }
}
