use std::fmt;
use std::sync::Arc;

/// 常量池条目类型（与线上 tag 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
    String,
    Enum,
    Klass,
    Method,
    NodeClass,
    Field,
    Signature,
}

#[derive(Debug, PartialEq)]
pub struct Klass {
    pub name: Arc<str>,
    /// 枚举类的取值；普通类为 None
    pub values: Option<Vec<Arc<str>>>,
}

impl Klass {
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, PartialEq)]
pub struct EnumValue {
    pub klass: Arc<Klass>,
    pub ordinal: i32,
}

impl EnumValue {
    pub fn name(&self) -> String {
        let values = self.klass.values.as_deref().unwrap_or(&[]);
        match usize::try_from(self.ordinal).ok().and_then(|i| values.get(i)) {
            Some(v) => v.to_string(),
            None => format!("{}#{}", self.klass.simple_name(), self.ordinal),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Port {
    pub is_list: bool,
    pub name: Arc<str>,
}

#[derive(Debug, PartialEq)]
pub struct TypedPort {
    pub port: Port,
    pub kind: Option<Arc<EnumValue>>,
}

#[derive(Debug, PartialEq)]
pub struct NodeClass {
    pub class_name: Arc<str>,
    pub name_template: Arc<str>,
    pub inputs: Vec<TypedPort>,
    pub successors: Vec<Port>,
}

impl NodeClass {
    pub fn simple_name(&self) -> &str {
        self.class_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.class_name)
    }

    /// 按模板生成节点显示名：`{p#key}` 替换为属性值，其余原样保留
    pub fn format_name<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
        let template: &str = &self.name_template;
        if template.is_empty() {
            return self.simple_name().to_string();
        }
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{p#") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 3..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    out.push_str(lookup(key).unwrap_or("?"));
                    rest = &after[close + 1..];
                }
                None => {
                    rest = &rest[open..];
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[derive(Debug, PartialEq)]
pub struct Signature {
    pub args: Vec<Arc<str>>,
    pub ret: Arc<str>,
}

#[derive(Debug, PartialEq)]
pub struct Method {
    pub holder: Option<Arc<Klass>>,
    pub name: Arc<str>,
    pub signature: Option<Arc<Signature>>,
    pub flags: i32,
    pub code: Option<Arc<[u8]>>,
}

#[derive(Debug, PartialEq)]
pub struct Field {
    pub holder: Option<Arc<Klass>>,
    pub name: Arc<str>,
    pub type_name: Arc<str>,
    pub flags: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PoolValue {
    String(Arc<str>),
    Klass(Arc<Klass>),
    Enum(Arc<EnumValue>),
    NodeClass(Arc<NodeClass>),
    Method(Arc<Method>),
    Field(Arc<Field>),
    Signature(Arc<Signature>),
}

impl PoolValue {
    pub fn kind(&self) -> PoolKind {
        match self {
            PoolValue::String(_) => PoolKind::String,
            PoolValue::Klass(_) => PoolKind::Klass,
            PoolValue::Enum(_) => PoolKind::Enum,
            PoolValue::NodeClass(_) => PoolKind::NodeClass,
            PoolValue::Method(_) => PoolKind::Method,
            PoolValue::Field(_) => PoolKind::Field,
            PoolValue::Signature(_) => PoolKind::Signature,
        }
    }
}

fn holder_name(holder: &Option<Arc<Klass>>) -> &str {
    holder.as_deref().map(|k| k.simple_name()).unwrap_or("?")
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, "){}", self.ret)
    }
}

impl fmt::Display for PoolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolValue::String(s) => write!(f, "{}", s),
            PoolValue::Klass(k) => write!(f, "{}", k.name),
            PoolValue::Enum(e) => write!(f, "{}", e.name()),
            PoolValue::NodeClass(nc) => write!(f, "{}", nc.class_name),
            PoolValue::Method(m) => match &m.signature {
                Some(sig) => write!(f, "{}.{}{}", holder_name(&m.holder), m.name, sig),
                None => write!(f, "{}.{}", holder_name(&m.holder), m.name),
            },
            PoolValue::Field(fd) => write!(f, "{}.{}", holder_name(&fd.holder), fd.name),
            PoolValue::Signature(sig) => write!(f, "{}", sig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_class(template: &str) -> NodeClass {
        NodeClass {
            class_name: Arc::from("org.graal.nodes.ConstantNode"),
            name_template: Arc::from(template),
            inputs: Vec::new(),
            successors: Vec::new(),
        }
    }

    #[test]
    fn name_template_substitutes_properties() {
        let nc = node_class("C({p#rawvalue}) {p#stamp}");
        let name = nc.format_name(|k| match k {
            "rawvalue" => Some("42"),
            _ => None,
        });
        assert_eq!(name, "C(42) ?");
        assert_eq!(node_class("").format_name(|_| None), "ConstantNode");
        assert_eq!(node_class("Broken{p#x").format_name(|_| None), "Broken{p#x");
    }

    #[test]
    fn display_method_and_enum() {
        let holder = Arc::new(Klass {
            name: Arc::from("java.lang.String"),
            values: None,
        });
        let m = PoolValue::Method(Arc::new(Method {
            holder: Some(holder),
            name: Arc::from("hashCode"),
            signature: Some(Arc::new(Signature {
                args: vec![],
                ret: Arc::from("I"),
            })),
            flags: 1,
            code: None,
        }));
        assert_eq!(m.to_string(), "String.hashCode()I");

        let kind = Arc::new(Klass {
            name: Arc::from("InputType"),
            values: Some(vec![Arc::from("Value"), Arc::from("State")]),
        });
        let e = EnumValue {
            klass: kind,
            ordinal: 1,
        };
        assert_eq!(e.name(), "State");
    }
}
