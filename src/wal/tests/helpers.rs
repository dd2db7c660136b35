use crate::oplist::{ModOp, Op, OpList};
use crate::value::Value;

pub(crate) fn mod_op(name: &str, prop: &Value, src: &str) -> ModOp {
    ModOp {
        key_a: "entry".into(),
        val_a: Value::str(name),
        key_b: "property".into(),
        val_b: prop.clone(),
        src: src.into(),
    }
}

pub(crate) fn add_list(ops: &[(&str, Value, &str)]) -> OpList {
    let mut list = OpList::new();
    for (name, prop, src) in ops {
        list.push_add(mod_op(name, prop, src));
    }
    list
}

pub(crate) fn ops_of(list: &OpList) -> Vec<Op> {
    list.iter().cloned().collect()
}
