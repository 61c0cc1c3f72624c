//! table.rs — Tables de hachage à adressage ouvert (globales, interning).
//!
//! Sondage linéaire, facteur de charge 0.75, suppression par tombstones
//! (entrée sans clé avec valeur `true`). Les clés sont des `Rc<ObjStr>`
//! comparées par **identité** : l'interning garantit qu'une identité égale
//! équivaut à un contenu égal. `find_string` est l'exception — utilisée
//! uniquement par l'interning, elle compare longueur, hash puis octets.
//!
//! Le redimensionnement reconstruit toutes les entrées : les positions de
//! sondage dépendent de la capacité, un `realloc` ne suffirait pas.

use std::rc::Rc;

use crate::value::{ObjStr, Value};

/// Entrée d'un bucket. Vide = pas de clé + `nil` ; tombstone = pas de clé
/// + `true`.
#[derive(Debug, Clone)]
struct Entry {
    key: Option<Rc<ObjStr>>,
    value: Value,
}

impl Entry {
    fn vacant() -> Self {
        Self { key: None, value: Value::Nil }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !matches!(self.value, Value::Nil)
    }
}

/// Table clé (chaîne internée) → valeur.
#[derive(Debug, Default)]
pub struct Table {
    /// Entrées occupées + tombstones (borne le facteur de charge).
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot de `key`, ou le premier slot réutilisable sur son chemin de
    /// sondage (tombstone rencontré avant l'entrée vide).
    fn find_entry(entries: &[Entry], key: &Rc<ObjStr>) -> usize {
        let capacity = entries.len();
        let mut index = key.hash as usize % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match &entry.key {
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if Rc::ptr_eq(k, key) => return index,
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::vacant(); capacity];
        // Réinsertion : les tombstones ne survivent pas au resize.
        self.count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let dest = Self::find_entry(&entries, &key);
                entries[dest] = Entry { key: Some(key), value: entry.value };
                self.count += 1;
            }
        }
        self.entries = entries;
    }

    /// Insère ou remplace. Retourne `true` si la clé est nouvelle.
    pub fn set(&mut self, key: Rc<ObjStr>, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            let capacity = (self.entries.len() * 2).max(8);
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        // Un tombstone réutilisé était déjà compté.
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry { key: Some(key), value };
        is_new
    }

    pub fn get(&self, key: &Rc<ObjStr>) -> Option<&Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key);
        let entry = &self.entries[index];
        entry.key.as_ref().map(|_| &entry.value)
    }

    /// Supprime en laissant un tombstone. Retourne `true` si la clé existait.
    pub fn delete(&mut self, key: &Rc<ObjStr>) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry { key: None, value: Value::Bool(true) };
        true
    }

    /// Recherche par contenu (interning seulement) : longueur, hash, octets.
    pub fn find_string(&self, needle: &str, hash: u32) -> Option<Rc<ObjStr>> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None => {
                    // Une entrée vide (non tombstone) clôt le chemin.
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(k) => {
                    if k.chars.len() == needle.len()
                        && k.hash == hash
                        && &*k.chars == needle
                    {
                        return Some(Rc::clone(k));
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }
}

/// Table d'interning : tout `ObjStr` du système passe par ici, si bien que
/// deux chaînes de même contenu partagent la même allocation.
#[derive(Debug, Default)]
pub struct Strings {
    table: Table,
}

impl Strings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interne une tranche empruntée (copie à la première rencontre).
    pub fn copy_string(&mut self, chars: &str) -> Rc<ObjStr> {
        let hash = ObjStr::hash_of(chars);
        if let Some(existing) = self.table.find_string(chars, hash) {
            return existing;
        }
        let string = Rc::new(ObjStr { chars: chars.into(), hash });
        self.table.set(Rc::clone(&string), Value::Nil);
        string
    }

    /// Interne un buffer déjà possédé ; sur un hit, le buffer entrant est
    /// abandonné et la chaîne résidente retournée.
    pub fn take_string(&mut self, chars: String) -> Rc<ObjStr> {
        let hash = ObjStr::hash_of(&chars);
        if let Some(existing) = self.table.find_string(&chars, hash) {
            return existing;
        }
        let string = Rc::new(ObjStr { chars: chars.into_boxed_str(), hash });
        self.table.set(Rc::clone(&string), Value::Nil);
        string
    }
}

/* ------------------------------- Tests ------------------------------- */
