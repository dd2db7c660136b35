use crate::store::Store;
use crate::strings::StringTable;
use crate::value::Value;

/// `(name, properties, source)` rows for seeding a test store, the shape
/// the whole test suite uses for media entries.
pub(crate) struct Seed<'a> {
    pub name: &'a str,
    pub props: &'a [&'a str],
    pub src: &'a str,
}

pub(crate) fn seed(store: &mut Store, strings: &StringTable, rows: &[Seed<'_>]) {
    for row in rows {
        for prop in row.props {
            store.add(
                strings,
                "entry",
                &Value::str(row.name),
                "property",
                &Value::str(prop),
                row.src,
            );
        }
    }
}
