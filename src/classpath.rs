use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;

use crate::descriptor;
use crate::error::{EvalError, EvalResult};

pub const OBJECT_CLASS: &str = "java/lang/Object";

/// Nominal class model used by the reference lattice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub is_final: bool,
}

impl ClassInfo {
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            is_interface: false,
            is_final: false,
        }
    }

    pub fn interface(name: &str) -> Self {
        Self {
            is_interface: true,
            ..Self::new(name, Some(OBJECT_CLASS))
        }
    }

    pub fn with_interfaces(mut self, interfaces: &[&str]) -> Self {
        self.interfaces = interfaces.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn final_class(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Class hierarchy index keyed by internal class name.
#[derive(Clone, Debug, Default)]
pub struct ClassPool {
    classes: BTreeMap<String, Arc<ClassInfo>>,
}

impl ClassPool {
    /// Build a pool from scanned classes, rejecting duplicates and filling in platform classes.
    pub fn new(classes: Vec<ClassInfo>) -> Result<Self> {
        let mut class_map: BTreeMap<String, Vec<ClassInfo>> = BTreeMap::new();
        for class in classes {
            class_map.entry(class.name.clone()).or_default().push(class);
        }

        let duplicates: Vec<String> = class_map
            .iter()
            .filter(|(_, entries)| entries.len() > 1)
            .map(|(name, entries)| format!("{name} ({})", entries.len()))
            .collect();
        if !duplicates.is_empty() {
            anyhow::bail!("duplicate classes found: {}", duplicates.join(", "));
        }

        let mut pool = Self::platform();
        for (name, mut entries) in class_map {
            if let Some(class) = entries.pop() {
                pool.classes.insert(name, Arc::new(class));
            }
        }
        Ok(pool)
    }

    /// Pool holding only the built-in platform classes.
    pub fn platform() -> Self {
        let mut classes = BTreeMap::new();
        for class in platform_classes() {
            classes.insert(class.name.clone(), Arc::new(class));
        }
        Self { classes }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.classes.get(name).cloned()
    }

    /// Class model for a class type such as `Ljava/lang/String;`.
    pub fn class_of_type(&self, ty: &str) -> Option<Arc<ClassInfo>> {
        descriptor::class_name(ty).and_then(|name| self.get(name))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn require(&self, class: &str, name: &str) -> EvalResult<&Arc<ClassInfo>> {
        self.classes
            .get(name)
            .ok_or_else(|| EvalError::IncompleteClassHierarchy {
                class: class.to_string(),
                missing: name.to_string(),
            })
    }

    /// The class itself followed by its superclasses up to `java/lang/Object`.
    pub fn superclass_chain(&self, name: &str) -> EvalResult<Vec<Arc<ClassInfo>>> {
        let mut chain = Vec::new();
        let mut current = self.require(name, name)?.clone();
        loop {
            let next = current.super_name.clone();
            chain.push(current.clone());
            match next {
                Some(super_name) => current = self.require(&current.name, &super_name)?.clone(),
                None => break,
            }
            if chain.len() > self.classes.len() {
                break;
            }
        }
        Ok(chain)
    }

    /// Every interface implemented by the class, including inherited ones.
    pub fn all_interfaces(&self, name: &str) -> EvalResult<BTreeSet<String>> {
        let mut interfaces = BTreeSet::new();
        let mut queue = VecDeque::new();
        for class in self.superclass_chain(name)? {
            if class.is_interface {
                interfaces.insert(class.name.clone());
            }
            queue.extend(class.interfaces.iter().map(|i| (class.name.clone(), i.clone())));
        }
        while let Some((owner, interface)) = queue.pop_front() {
            if !interfaces.insert(interface.clone()) {
                continue;
            }
            let info = self.require(&owner, &interface)?;
            queue.extend(info.interfaces.iter().map(|i| (interface.clone(), i.clone())));
        }
        Ok(interfaces)
    }

    /// Whether `sub` is `sup` or extends or implements it.
    pub fn is_subclass_of(&self, sub: &str, sup: &str) -> EvalResult<bool> {
        if sub == sup || sup == OBJECT_CLASS {
            return Ok(true);
        }
        let sup_info = self.require(sup, sup)?;
        if sup_info.is_interface {
            return Ok(self.all_interfaces(sub)?.contains(sup));
        }
        Ok(self
            .superclass_chain(sub)?
            .iter()
            .any(|class| class.name == sup))
    }

    /// Assignability between two reference types in descriptor form.
    pub fn is_assignable(&self, sub: &str, sup: &str) -> EvalResult<bool> {
        if sub == sup || sup == descriptor::OBJECT_TYPE {
            return Ok(true);
        }
        match (descriptor::element_type(sub), descriptor::element_type(sup)) {
            (Some(sub_element), Some(sup_element)) => {
                if descriptor::is_reference(sub_element) && descriptor::is_reference(sup_element) {
                    self.is_assignable(sub_element, sup_element)
                } else {
                    Ok(sub_element == sup_element)
                }
            }
            (Some(_), None) => Ok(matches!(
                descriptor::class_name(sup),
                Some("java/lang/Cloneable" | "java/io/Serializable")
            )),
            (None, Some(_)) => Ok(false),
            (None, None) => match (descriptor::class_name(sub), descriptor::class_name(sup)) {
                (Some(sub_name), Some(sup_name)) => self.is_subclass_of(sub_name, sup_name),
                _ => Ok(false),
            },
        }
    }

    /// Most specific common supertype of two classes.
    ///
    /// Falls back to the common interfaces when the shared superclass is `java/lang/Object`,
    /// picking the alphabetically first of the most specific ones.
    pub fn common_supertype(&self, left: &str, right: &str) -> EvalResult<String> {
        if self.is_subclass_of(left, right)? {
            return Ok(right.to_string());
        }
        if self.is_subclass_of(right, left)? {
            return Ok(left.to_string());
        }
        let left_chain: BTreeSet<String> = self
            .superclass_chain(left)?
            .iter()
            .map(|class| class.name.clone())
            .collect();
        let shared = self
            .superclass_chain(right)?
            .into_iter()
            .find(|class| left_chain.contains(&class.name))
            .map(|class| class.name.clone())
            .unwrap_or_else(|| OBJECT_CLASS.to_string());
        if shared != OBJECT_CLASS {
            return Ok(shared);
        }

        let right_interfaces = self.all_interfaces(right)?;
        let common: Vec<String> = self
            .all_interfaces(left)?
            .into_iter()
            .filter(|name| right_interfaces.contains(name))
            .collect();
        for candidate in &common {
            let mut most_specific = true;
            for other in &common {
                if other != candidate && self.is_subclass_of(other, candidate)? {
                    most_specific = false;
                    break;
                }
            }
            if most_specific {
                return Ok(candidate.clone());
            }
        }
        Ok(OBJECT_CLASS.to_string())
    }
}

fn platform_classes() -> Vec<ClassInfo> {
    let object = OBJECT_CLASS;
    let throwable = "java/lang/Throwable";
    let exception = "java/lang/Exception";
    let runtime = "java/lang/RuntimeException";
    vec![
        ClassInfo::new(object, None),
        ClassInfo::interface("java/io/Serializable"),
        ClassInfo::interface("java/lang/Cloneable"),
        ClassInfo::interface("java/lang/Comparable"),
        ClassInfo::interface("java/lang/CharSequence"),
        ClassInfo::interface("java/lang/Appendable"),
        ClassInfo::new("java/lang/String", Some(object))
            .with_interfaces(&[
                "java/io/Serializable",
                "java/lang/Comparable",
                "java/lang/CharSequence",
            ])
            .final_class(),
        ClassInfo::new("java/lang/StringBuilder", Some(object))
            .with_interfaces(&[
                "java/io/Serializable",
                "java/lang/CharSequence",
                "java/lang/Appendable",
            ])
            .final_class(),
        ClassInfo::new("java/lang/StringBuffer", Some(object))
            .with_interfaces(&[
                "java/io/Serializable",
                "java/lang/CharSequence",
                "java/lang/Appendable",
            ])
            .final_class(),
        ClassInfo::new("java/lang/Class", Some(object)).final_class(),
        ClassInfo::new("java/lang/Number", Some(object)).with_interfaces(&["java/io/Serializable"]),
        ClassInfo::new("java/lang/Integer", Some("java/lang/Number"))
            .with_interfaces(&["java/lang/Comparable"])
            .final_class(),
        ClassInfo::new("java/lang/Long", Some("java/lang/Number"))
            .with_interfaces(&["java/lang/Comparable"])
            .final_class(),
        ClassInfo::new(throwable, Some(object)).with_interfaces(&["java/io/Serializable"]),
        ClassInfo::new(exception, Some(throwable)),
        ClassInfo::new("java/lang/Error", Some(throwable)),
        ClassInfo::new(runtime, Some(exception)),
        ClassInfo::new("java/lang/ArithmeticException", Some(runtime)),
        ClassInfo::new("java/lang/NullPointerException", Some(runtime)),
        ClassInfo::new("java/lang/ClassCastException", Some(runtime)),
        ClassInfo::new("java/lang/IndexOutOfBoundsException", Some(runtime)),
        ClassInfo::new(
            "java/lang/ArrayIndexOutOfBoundsException",
            Some("java/lang/IndexOutOfBoundsException"),
        ),
        ClassInfo::new("java/lang/NegativeArraySizeException", Some(runtime)),
        ClassInfo::new("java/lang/invoke/MethodType", Some(object)).final_class(),
        ClassInfo::new("java/lang/invoke/MethodHandle", Some(object)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ClassPool {
        ClassPool::new(vec![
            ClassInfo::interface("com/example/Shape"),
            ClassInfo::interface("com/example/Named"),
            ClassInfo::new("com/example/Base", Some(OBJECT_CLASS)),
            ClassInfo::new("com/example/Circle", Some("com/example/Base"))
                .with_interfaces(&["com/example/Shape", "com/example/Named"]),
            ClassInfo::new("com/example/Square", Some("com/example/Base"))
                .with_interfaces(&["com/example/Shape"]),
            ClassInfo::new("com/example/Label", Some(OBJECT_CLASS))
                .with_interfaces(&["com/example/Shape", "com/example/Named"]),
            ClassInfo::new("com/example/Orphan", Some("com/example/Missing")),
        ])
        .expect("pool")
    }

    #[test]
    fn duplicate_classes_are_rejected() {
        let result = ClassPool::new(vec![
            ClassInfo::new("com/example/Foo", Some(OBJECT_CLASS)),
            ClassInfo::new("com/example/Foo", Some(OBJECT_CLASS)),
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn common_supertype_prefers_shared_superclass() {
        let pool = pool();

        let common = pool
            .common_supertype("com/example/Circle", "com/example/Square")
            .expect("common");

        assert_eq!(common, "com/example/Base");
    }

    #[test]
    fn common_supertype_breaks_interface_ties_alphabetically() {
        let pool = pool();

        let left = pool
            .common_supertype("com/example/Circle", "com/example/Label")
            .expect("common");
        let right = pool
            .common_supertype("com/example/Label", "com/example/Circle")
            .expect("common");

        assert_eq!(left, "com/example/Named");
        assert_eq!(left, right);
    }

    #[test]
    fn missing_superclass_reports_incomplete_hierarchy() {
        let pool = pool();

        let err = pool
            .common_supertype("com/example/Orphan", "com/example/Base")
            .expect_err("incomplete");

        assert_eq!(
            err,
            EvalError::IncompleteClassHierarchy {
                class: "com/example/Orphan".to_string(),
                missing: "com/example/Missing".to_string(),
            }
        );
    }

    #[test]
    fn arrays_are_assignable_to_cloneable_and_covariant() {
        let pool = pool();

        assert!(pool
            .is_assignable("[Lcom/example/Circle;", "[Lcom/example/Shape;")
            .expect("assignable"));
        assert!(pool
            .is_assignable("[I", "Ljava/lang/Cloneable;")
            .expect("assignable"));
        assert!(!pool.is_assignable("[I", "[J").expect("assignable"));
        assert!(!pool
            .is_assignable("Ljava/lang/Object;", "[I")
            .expect("assignable"));
    }
}
